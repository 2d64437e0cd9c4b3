//! Restart-on-failure wrapper for a conversation's tasks.
//!
//! A failing or panicking task is logged, reported on the event bus, and
//! restarted after a cooldown. Failures never leave the conversation's own
//! tasks; other conversations keep running.

use std::future::Future;

use chatloop_core::error::Result;
use chatloop_core::event::DomainEvent;
use chrono::Utc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::context::LoopContext;

/// Which of a conversation's tasks is being supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Driver,
    Background(&'static str),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Driver => "driver",
            TaskKind::Background(name) => name,
        }
    }
}

fn failure_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".into());
            format!("panicked: {detail}")
        }
        Err(err) => err.to_string(),
    }
}

/// Run `factory`'s task until it finishes cleanly or `cancel` fires,
/// restarting it after `timing.restart_cooldown` whenever it fails.
pub async fn supervise<F, Fut>(kind: TaskKind, ctx: LoopContext, cancel: CancellationToken, mut factory: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let cooldown = ctx.config.timing.restart_cooldown();
    let stream = ctx.stream.label().to_string();

    loop {
        let mut worker = tokio::spawn(factory());

        let joined = tokio::select! {
            _ = cancel.cancelled() => {
                worker.abort();
                let _ = worker.await;
                debug!(stream = %stream, task = kind.name(), "Task cancelled");
                return;
            }
            joined = &mut worker => joined,
        };

        let message = match joined {
            Ok(Ok(())) => {
                debug!(stream = %stream, task = kind.name(), "Task finished");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_cancelled() => return,
            Err(e) => failure_message(e),
        };

        error!(
            stream = %stream,
            task = kind.name(),
            error = %message,
            cooldown_secs = cooldown.as_secs(),
            "Task failed, restarting after cooldown"
        );

        let event = match kind {
            TaskKind::Driver => DomainEvent::LoopRestarted {
                stream_id: ctx.stream_id().to_string(),
                error_message: message,
                timestamp: Utc::now(),
            },
            TaskKind::Background(task) => DomainEvent::BackgroundTaskFailed {
                stream_id: ctx.stream_id().to_string(),
                task: task.to_string(),
                error_message: message,
                timestamp: Utc::now(),
            },
        };
        ctx.events.publish(event);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(cooldown) => {}
        }
    }
}
