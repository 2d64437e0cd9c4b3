//! `chatloop simulate`: Drive one conversation loop from stdin.

use std::sync::Arc;
use std::time::Duration;

use chatloop_config::AppConfig;
use chatloop_core::event::{DomainEvent, EventBus};
use chatloop_core::message::StreamInfo;
use chatloop_engine::ChatRegistry;
use chatloop_store::InMemoryMessageStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::demo;

pub async fn run(group: bool, stream_id: String, linger: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?);

    let stream = if group {
        StreamInfo::group(&stream_id, &stream_id)
    } else {
        StreamInfo::private(&stream_id, &stream_id)
    }
    .with_name(format!("{}:{stream_id}", if group { "group" } else { "dm" }));

    let store = InMemoryMessageStore::new();
    let registry = ChatRegistry::new(demo::collaborators(store.clone()), config, EventBus::default());

    let mut events = registry.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => eprintln!("   … {skipped} events skipped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    registry.create(stream.clone()).await?;
    println!("💬 Simulating {}. Type messages, `name: text` to set a sender, Ctrl-D to finish", stream.label());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(message) = demo::parse_line(&stream_id, &line) {
            store.push(message).await;
        }
    }

    tokio::time::sleep(Duration::from_secs(linger)).await;

    let history = registry.history(&stream_id).await.unwrap_or_default();
    let snapshot = registry.snapshot(&stream_id).await;
    registry.stop_all().await;
    printer.abort();

    println!();
    println!("📜 Cycle history ({} cycles)", history.len());
    for record in &history {
        let outcome = if record.action.taken { "✅" } else { "··" };
        let detail = match (&record.action.error, record.action.reply_text.is_empty()) {
            (Some(error), _) => format!("error: {error}"),
            (None, false) => record.action.reply_text.clone(),
            (None, true) => record
                .plan
                .as_ref()
                .map(|p| p.reasoning.clone())
                .unwrap_or_default(),
        };
        println!(
            "   {outcome} #{:<3} {:<7} {:<14} {:>6.2}s  {detail}",
            record.cycle_id,
            record.mode.to_string(),
            record.action_name(),
            record.elapsed.as_secs_f64()
        );
    }

    if let Some(snapshot) = snapshot {
        println!();
        println!(
            "   Final mode: {}  energy: {:.1}  reply timeouts: {}  plan timeouts: {}",
            snapshot.mode, snapshot.energy, snapshot.consecutive_reply_timeouts, snapshot.plan_timeouts
        );
    }

    Ok(())
}

fn print_event(event: &DomainEvent) {
    match event {
        DomainEvent::ModeChanged { from, to, energy, .. } => {
            println!("   ⚡ mode {from} → {to} (energy {energy:.1})");
        }
        DomainEvent::ProactiveTriggered { silence, .. } => {
            println!("   🔔 silence of {} broken", chatloop_engine::format_duration(*silence));
        }
        DomainEvent::TimeoutWarning { consecutive, .. } => {
            println!("   ⚠️  {consecutive} replies in a row timed out");
        }
        DomainEvent::LoopRestarted { error_message, .. } => {
            println!("   ❌ loop restarted: {error_message}");
        }
        DomainEvent::BackgroundTaskFailed { task, error_message, .. } => {
            println!("   ❌ {task} task failed: {error_message}");
        }
        DomainEvent::CycleCompleted { .. } => {}
    }
}
