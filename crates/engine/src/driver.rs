//! The per-conversation main loop.
//!
//! Each tick reads new messages and, depending on the mode, either passes the
//! earliest one through the willingness gate (idle) or runs a full pipeline
//! pass over the freshest one (engaged). Proactive triggers queued by the
//! scheduler are picked up at the start of a tick, so no two cycles of the
//! same conversation ever overlap.

use std::sync::Arc;

use chatloop_core::cycle::ChatMode;
use chatloop_core::error::Result;
use chatloop_core::message::{ChatMessage, Trigger};
use chatloop_core::store::FetchFilter;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::LoopContext;
use crate::energy::{EnergyLog, EnergyModel, ModeChange};
use crate::gate::WillingnessGate;
use crate::pipeline::PlanActPipeline;

/// Proactive triggers, shared across driver restarts.
pub type ProactiveInbox = Arc<Mutex<mpsc::Receiver<Trigger>>>;

/// What the loop does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sleep `loop_pause` before the next tick
    Pause,
    /// Start the next tick at once (the mode just switched to engaged)
    Reenter,
}

pub struct CycleDriver {
    ctx: LoopContext,
    pipeline: PlanActPipeline,
    model: EnergyModel,
    gate: WillingnessGate,
    energy_log: EnergyLog,
    proactive: ProactiveInbox,
}

impl CycleDriver {
    pub fn new(ctx: LoopContext, proactive: ProactiveInbox) -> Self {
        Self {
            pipeline: PlanActPipeline::new(ctx.clone()),
            model: EnergyModel::from_config(&ctx.config),
            gate: WillingnessGate::new(ctx.collab.willingness.clone()),
            energy_log: EnergyLog::default(),
            proactive,
            ctx,
        }
    }

    /// Tick until cancelled. An error ends the loop; the supervisor decides
    /// whether to restart it.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(stream = %self.ctx.stream.label(), kind = self.ctx.stream.kind.as_str(), "Conversation loop started");
        let pause = self.ctx.config.timing.loop_pause();
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.tick() => result?,
            };
            if outcome == TickOutcome::Reenter {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(stream = %self.ctx.stream.label(), "Conversation loop stopped");
        Ok(())
    }

    /// One iteration of the loop.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let queued = self.proactive.lock().await.try_recv().ok();
        if let Some(trigger) = queued {
            self.proactive_tick(trigger).await?;
            return Ok(TickOutcome::Pause);
        }

        let since = self.ctx.state.read().await.last_read_time;
        let messages = match self
            .ctx
            .collab
            .store
            .fetch_since(
                self.ctx.stream_id(),
                since,
                self.ctx.config.chat.fetch_limit,
                &FetchFilter::default(),
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(stream = %self.ctx.stream.label(), error = %e, "Message fetch failed");
                self.idle_wait().await;
                return Ok(TickOutcome::Pause);
            }
        };

        if !messages.is_empty() {
            self.ctx.state.write().await.last_message_at = Instant::now();
        }

        if self.ctx.collab.is_sleeping().await {
            if let Some(newest) = messages.last() {
                debug!(stream = %self.ctx.stream.label(), skipped = messages.len(), "Sleeping, messages left unanswered");
                self.ctx.state.write().await.last_read_time = newest.timestamp;
            }
            self.idle_wait().await;
            return Ok(TickOutcome::Pause);
        }

        let mode = self.ctx.state.read().await.mode();
        match mode {
            ChatMode::Engaged => {
                self.engaged_tick(messages).await?;
                Ok(TickOutcome::Pause)
            }
            ChatMode::Idle => self.idle_tick(messages).await,
        }
    }

    async fn proactive_tick(&mut self, trigger: Trigger) -> Result<()> {
        if self.ctx.state.read().await.mode() != ChatMode::Engaged {
            debug!(stream = %self.ctx.stream.label(), "Proactive trigger dropped, no longer engaged");
            return Ok(());
        }
        self.pipeline.observe(Some(trigger)).await?;
        Ok(())
    }

    async fn engaged_tick(&mut self, messages: Vec<ChatMessage>) -> Result<()> {
        let has_messages = !messages.is_empty();

        if let Some(newest) = messages.into_iter().last() {
            self.ctx.state.write().await.last_read_time = newest.timestamp;
            if self.pipeline.observe(Some(Trigger::Message(newest))).await? {
                let energy = {
                    let mut state = self.ctx.state.write().await;
                    self.model.after_engaged_observe(&mut state);
                    state.energy()
                };
                self.energy_log
                    .record(self.ctx.stream.label(), "Took part in the conversation", energy);
            }
        }

        let change = {
            let mut state = self.ctx.state.write().await;
            self.model.engaged_transition(&mut state)
        };
        if let Some(change) = change {
            self.publish(change, "Energy ran out, back to idle");
        }

        if !has_messages {
            self.idle_wait().await;
        }
        Ok(())
    }

    async fn idle_tick(&mut self, messages: Vec<ChatMessage>) -> Result<TickOutcome> {
        let change = {
            let mut state = self.ctx.state.write().await;
            self.model.idle_transition(&mut state, messages.len())
        };
        if let Some(change) = change {
            self.publish(change, "Conversation picked up, engaging");
            return Ok(TickOutcome::Reenter);
        }

        let Some(earliest) = messages.into_iter().next() else {
            self.idle_wait().await;
            return Ok(TickOutcome::Pause);
        };
        self.ctx.state.write().await.last_read_time = earliest.timestamp;

        let talk_frequency = self.ctx.config.chat.talk_frequency_for(self.ctx.stream_id());
        let roll = rand::random::<f64>();
        let decision = self
            .gate
            .evaluate(&self.ctx.stream, &earliest, talk_frequency, roll)
            .await;

        let responded = if decision.reply {
            self.pipeline.observe(Some(Trigger::Message(earliest))).await?
        } else {
            false
        };

        let energy = {
            let mut state = self.ctx.state.write().await;
            self.model.after_idle_response(&mut state, responded);
            state.energy()
        };
        let reason = if responded { "Replied, energy up" } else { "Listened, energy up" };
        self.energy_log.record(self.ctx.stream.label(), reason, energy);
        Ok(TickOutcome::Pause)
    }

    fn publish(&self, change: ModeChange, reason: &str) {
        info!(
            stream = %self.ctx.stream.label(),
            from = %change.from,
            to = %change.to,
            energy = %format!("{:.1}", change.energy),
            "{reason}"
        );
        self.ctx.events.publish(change.into_event(self.ctx.stream_id()));
    }

    async fn idle_wait(&self) {
        tokio::time::sleep(self.ctx.config.timing.idle_poll()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockGenerator, TestHarness, dm_stream, group_stream};
    use chatloop_config::AppConfig;
    use chatloop_core::action::{ActionSet, ActionSpec, PlannedAction};
    use chatloop_core::error::ActionError;
    use chatloop_core::event::DomainEvent;
    use chatloop_core::planner::PlanResult;
    use chrono::{Duration, Utc};

    use crate::test_helpers::{MockExecutor, MockPlanner};

    fn driver(h: &TestHarness) -> (CycleDriver, mpsc::Sender<Trigger>) {
        let (tx, rx) = mpsc::channel(4);
        (CycleDriver::new(h.ctx.clone(), Arc::new(Mutex::new(rx))), tx)
    }

    async fn push(h: &TestHarness, offset_secs: i64, interest: f64) -> ChatMessage {
        let msg = ChatMessage::text(h.ctx.stream_id(), "alice", format!("message +{offset_secs}s"))
            .with_interest(interest)
            .with_timestamp(Utc::now() + Duration::seconds(offset_secs));
        h.store.push(msg.clone()).await;
        msg
    }

    #[tokio::test(start_paused = true)]
    async fn idle_answers_earliest_message_through_gate() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        let first = push(&h, 1, 1.0).await;
        push(&h, 2, 1.0).await;
        let (mut driver, _tx) = driver(&h);

        driver.tick().await.unwrap();

        assert_eq!(h.sender.texts(), vec![format!("re:{}", first.id)]);
        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.mode, ChatMode::Idle);
        assert_eq!(snapshot.last_read_time, first.timestamp);
        assert!((snapshot.energy - 5.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_uninteresting_message_only_nudges_energy() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        push(&h, 1, 0.0).await;
        let (mut driver, _tx) = driver(&h);

        driver.tick().await.unwrap();

        assert!(h.sender.sent().is_empty());
        assert_eq!(h.generator.calls(), 0);
        assert!((h.snapshot().await.energy - 5.1).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn message_burst_engages_immediately() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        for i in 1..=4 {
            push(&h, i, 1.0).await;
        }
        let mut events = h.ctx.events.subscribe();
        let (mut driver, _tx) = driver(&h);

        assert_eq!(driver.tick().await.unwrap(), TickOutcome::Reenter);

        assert!(h.sender.sent().is_empty());
        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.mode, ChatMode::Engaged);
        assert!(snapshot.energy > 10.0);
        assert!(matches!(
            events.try_recv().unwrap().as_ref(),
            DomainEvent::ModeChanged { to: ChatMode::Engaged, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn engaging_burst_is_observed_without_pause() {
        let mut config = AppConfig::default();
        config.timing.loop_pause_ms = 60_000;
        let h = TestHarness::new(group_stream(), config);
        for i in 1..=4 {
            push(&h, i, 1.0).await;
        }
        let newest = push(&h, 5, 1.0).await;
        let (driver, _tx) = driver(&h);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(driver.run(cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        assert_eq!(h.snapshot().await.mode, ChatMode::Engaged);
        assert_eq!(h.generator.triggers(), vec![newest.id.clone()]);
        assert_eq!(h.sender.texts(), vec![format!("re:{}", newest.id)]);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn engaged_observes_freshest_message() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        h.set_mode(ChatMode::Engaged).await;
        push(&h, 1, 0.0).await;
        let newest = push(&h, 2, 0.0).await;
        let (mut driver, _tx) = driver(&h);

        driver.tick().await.unwrap();

        assert_eq!(h.generator.triggers(), vec![newest.id.clone()]);
        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.last_read_time, newest.timestamp);
        assert!((snapshot.energy - 6.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn engaged_drops_to_idle_when_energy_runs_out() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        h.set_mode(ChatMode::Engaged).await;
        h.ctx.state.write().await.set_energy(0.8);
        let (mut driver, _tx) = driver(&h);

        driver.tick().await.unwrap();

        assert_eq!(h.snapshot().await.mode, ChatMode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn private_chat_with_forced_focus_never_disengages() {
        let mut config = AppConfig::default();
        config.chat.force_focus_private = true;
        let h = TestHarness::new(dm_stream(), config);
        h.set_mode(ChatMode::Engaged).await;
        h.ctx.state.write().await.set_energy(0.5);
        let (mut driver, _tx) = driver(&h);

        driver.tick().await.unwrap();

        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.mode, ChatMode::Engaged);
        assert!((snapshot.energy - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeping_advances_cursor_without_replying() {
        let h = TestHarness::new(group_stream(), AppConfig::default()).sleeping();
        push(&h, 1, 1.0).await;
        let newest = push(&h, 2, 1.0).await;
        let (mut driver, _tx) = driver(&h);

        driver.tick().await.unwrap();

        assert!(h.sender.sent().is_empty());
        assert_eq!(h.snapshot().await.last_read_time, newest.timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_proactive_trigger_runs_when_engaged() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        h.set_mode(ChatMode::Engaged).await;
        let (mut driver, tx) = driver(&h);
        let trigger = Trigger::proactive(std::time::Duration::from_secs(1600), "been quiet");
        tx.send(trigger.clone()).await.unwrap();

        driver.tick().await.unwrap();

        assert_eq!(h.generator.triggers(), vec![trigger.id().to_string()]);
        assert_eq!(h.sender.texts(), vec![format!("re:{}", trigger.id())]);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_proactive_trigger_dropped_when_idle() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        let (mut driver, tx) = driver(&h);
        tx.send(Trigger::proactive(std::time::Duration::from_secs(1600), "quiet"))
            .await
            .unwrap();

        driver.tick().await.unwrap();
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_action_ends_the_run() {
        let h = TestHarness::new(group_stream(), AppConfig::default())
            .with_actions(ActionSet::core().with(ActionSpec::new("poke", "Poke someone")))
            .with_planner(MockPlanner::new(PlanResult::new(
                PlannedAction::Custom {
                    name: "poke".into(),
                    payload: serde_json::Value::Null,
                },
                "poke alice",
            )))
            .with_executor(MockExecutor::failing(ActionError::ExecutionFailed {
                action: "poke".into(),
                reason: "target left".into(),
            }))
            .with_generator(MockGenerator::echo());
        h.set_mode(ChatMode::Engaged).await;
        push(&h, 1, 1.0).await;
        let (driver, _tx) = driver(&h);

        let result = driver.run(CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(h.history().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let h = TestHarness::new(group_stream(), AppConfig::default());
        let (driver, _tx) = driver(&h);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(driver.run(cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        cancel.cancel();

        assert!(task.await.unwrap().is_ok());
    }
}
