//! The plan / generate / act pass run once per cycle.
//!
//! ```text
//! open cycle → refresh actions → ┬─ plan ───────────────┐
//!                                └─ pre-generate reply ─┤ (idle mode only)
//!                                                       ▼
//!           reply ─ await generation (bounded) → send
//!           other ─ abort generation → execute
//!           other, parallel ─ send ∥ execute → merge
//!                                                       ▼
//!                                         seal → history → event
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chatloop_core::action::{ActionContext, ActionSet, NO_REPLY, PlannedAction};
use chatloop_core::cycle::{ChatMode, CycleRecord, OpenCycle};
use chatloop_core::error::{GenerationError, Result};
use chatloop_core::event::DomainEvent;
use chatloop_core::message::{ChatKind, StreamInfo, Trigger};
use chatloop_core::planner::PlanResult;
use chatloop_core::reply::ReplySegment;
use chrono::{DateTime, Utc};
use tokio::time::{Instant, timeout};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

use crate::context::LoopContext;
use crate::response::{Delivery, ResponseSender, quote_threshold};

/// Child tasks of a pass are aborted when the pass is dropped, so stopping the
/// driver mid-cycle never leaves a generation or a send running.
type GenerationTask = AbortOnDropHandle<std::result::Result<Vec<ReplySegment>, GenerationError>>;

/// Result of awaiting a generation and sending it.
#[derive(Debug)]
enum ReplyOutcome {
    Sent(String),
    Declined,
    GenerationFailed(String),
    SendFailed(String),
}

/// Everything the reply branch needs, owned so it can run on its own task.
struct ReplyJob {
    responder: ResponseSender,
    stream: StreamInfo,
    generation: GenerationTask,
    trigger: Trigger,
    limit: Duration,
    cycle_started: DateTime<Utc>,
    quote_after: usize,
}

impl ReplyJob {
    async fn run(mut self) -> ReplyOutcome {
        let segments = match timeout(self.limit, &mut self.generation).await {
            Err(_) => {
                self.generation.abort();
                return ReplyOutcome::GenerationFailed(format!(
                    "reply generation timed out after {}s",
                    self.limit.as_secs()
                ));
            }
            Ok(Err(join)) => {
                return ReplyOutcome::GenerationFailed(format!("reply generation task failed: {join}"));
            }
            Ok(Ok(Err(e))) => return ReplyOutcome::GenerationFailed(e.to_string()),
            Ok(Ok(Ok(segments))) if segments.is_empty() => {
                return ReplyOutcome::GenerationFailed(GenerationError::EmptyReply.to_string());
            }
            Ok(Ok(Ok(segments))) => segments,
        };

        match self
            .responder
            .send(&self.stream, &self.trigger, &segments, self.cycle_started, self.quote_after)
            .await
        {
            Ok(Delivery::Sent(text)) => ReplyOutcome::Sent(text),
            Ok(Delivery::Declined) => ReplyOutcome::Declined,
            Err(e) => ReplyOutcome::SendFailed(e.to_string()),
        }
    }
}

fn abort(generation: Option<GenerationTask>) {
    if let Some(task) = generation {
        // no-op when the task already finished; its output is dropped with the handle
        task.abort();
    }
}

fn format_timers(timers: &BTreeMap<String, Duration>) -> String {
    timers
        .iter()
        .map(|(name, elapsed)| {
            if elapsed.as_secs_f64() < 1.0 {
                format!("{name}: {:.2}ms", elapsed.as_secs_f64() * 1000.0)
            } else {
                format!("{name}: {:.2}s", elapsed.as_secs_f64())
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs observe passes for one conversation.
pub struct PlanActPipeline {
    ctx: LoopContext,
    responder: ResponseSender,
}

impl PlanActPipeline {
    pub fn new(ctx: LoopContext) -> Self {
        let responder = ResponseSender::new(
            ctx.collab.sender.clone(),
            ctx.collab.store.clone(),
            ctx.config.proactive.silence_marker.clone(),
        );
        Self { ctx, responder }
    }

    fn spawn_generation(&self, trigger: Trigger, actions: ActionSet) -> GenerationTask {
        let generator = self.ctx.collab.generator.clone();
        let stream = self.ctx.stream.clone();
        AbortOnDropHandle::new(tokio::spawn(async move {
            generator.generate(&stream, &trigger, &actions).await
        }))
    }

    fn spawn_hooks(&self) {
        let hooks = self.ctx.collab.hooks.clone();
        let stream_id = self.ctx.stream_id().to_string();
        tokio::spawn(async move { hooks.relationship_context(&stream_id).await });

        let hooks = self.ctx.collab.hooks.clone();
        let stream_id = self.ctx.stream_id().to_string();
        tokio::spawn(async move { hooks.trigger_learning(&stream_id).await });
    }

    fn reply_job(&self, generation: GenerationTask, trigger: Trigger, cycle: &OpenCycle) -> ReplyJob {
        ReplyJob {
            responder: self.responder.clone(),
            stream: self.ctx.stream.clone(),
            generation,
            trigger,
            limit: self.ctx.config.chat.thinking_timeout(),
            cycle_started: cycle.started_at(),
            quote_after: quote_threshold(&mut rand::rng()),
        }
    }

    /// Run one cycle. Returns whether anything observable happened.
    ///
    /// Transient failures (planner errors, generation timeouts, send errors)
    /// are recorded and yield `Ok(false)`. A failing non-parallel action is
    /// recorded and then returned as an error so the driver can restart.
    pub async fn observe(&self, trigger: Option<Trigger>) -> Result<bool> {
        let stream = &self.ctx.stream;
        let (mode, mut cycle) = {
            let mut state = self.ctx.state.write().await;
            let trigger_id = trigger.as_ref().map(|t| t.id().to_string());
            (state.mode(), state.open_cycle(trigger_id))
        };
        debug!(stream = %stream.label(), cycle = cycle.cycle_id(), %mode, "Cycle started");

        self.spawn_hooks();

        let started = Instant::now();
        let mut actions = match self.ctx.collab.actions.refresh(stream, mode).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!(stream = %stream.label(), error = %e, "Action refresh failed, using core actions");
                ActionSet::core()
            }
        };
        cycle.record_timer("refresh_actions", started.elapsed());

        if mode == ChatMode::Engaged
            && self.ctx.config.chat.mention_forces_reply
            && trigger.as_ref().is_some_and(Trigger::is_mentioned)
            && actions.remove(NO_REPLY).is_some()
        {
            info!(stream = %stream.label(), "Mentioned, no_reply removed from options");
        }

        let mut generation = None;
        let started = Instant::now();
        let mut plan = if mode == ChatMode::Idle && !actions.has_non_reply_actions() {
            debug!(stream = %stream.label(), "Only reply actions available, planner skipped");
            PlanResult::forced_reply("no other actions available")
        } else {
            if mode == ChatMode::Idle
                && let Some(trigger) = &trigger
            {
                generation = Some(self.spawn_generation(trigger.clone(), actions.clone()));
            }

            let limit = self.ctx.config.chat.thinking_timeout();
            match timeout(limit, self.ctx.collab.planner.plan(stream, mode, &actions)).await {
                Ok(Ok(plan)) => plan,
                Ok(Err(e)) => {
                    abort(generation);
                    warn!(stream = %stream.label(), error = %e, "Planning failed");
                    cycle.record_error(e.to_string());
                    return self.finish(cycle, false).await;
                }
                Err(_) => {
                    abort(generation);
                    self.ctx.state.write().await.plan_timeouts += 1;
                    warn!(stream = %stream.label(), timeout_secs = limit.as_secs(), "Planning timed out");
                    cycle.record_error(format!("planner timed out after {}s", limit.as_secs()));
                    return self.finish(cycle, false).await;
                }
            }
        };
        cycle.record_timer("plan", started.elapsed());

        if mode == ChatMode::Engaged
            && stream.kind == ChatKind::Private
            && plan.action == PlannedAction::NoReply
        {
            debug!(stream = %stream.label(), "Private chat, no_reply turned into reply");
            plan.action = PlannedAction::Reply;
        }
        cycle.set_plan(plan.clone());

        let reply_trigger = trigger
            .clone()
            .or_else(|| plan.target.clone().map(Trigger::Message));
        let is_parallel = plan.is_parallel
            || actions
                .get(plan.action.name())
                .is_some_and(|spec| spec.parallel);

        let taken = match &plan.action {
            PlannedAction::NoReply | PlannedAction::NoAction => {
                abort(generation);
                info!(
                    stream = %stream.label(),
                    action = plan.action.name(),
                    reasoning = %plan.reasoning,
                    "Decided not to reply"
                );
                false
            }
            action if action.is_reply() => {
                let Some(target) = reply_trigger else {
                    abort(generation);
                    cycle.record_error("reply planned without a target");
                    return self.finish(cycle, false).await;
                };
                let generation = generation
                    .unwrap_or_else(|| self.spawn_generation(target.clone(), actions.clone()));
                let started = Instant::now();
                let outcome = self.reply_job(generation, target, &cycle).run().await;
                cycle.record_timer("reply", started.elapsed());
                self.apply_reply(&mut cycle, outcome).await
            }
            action if !is_parallel => {
                abort(generation);
                let context = self.action_context(&cycle, &plan, trigger.as_ref());
                let started = Instant::now();
                let result = self.ctx.collab.executor.execute(action, &context).await;
                cycle.record_timer("action", started.elapsed());
                match result {
                    Ok(outcome) => {
                        cycle.record_action(&outcome);
                        outcome.success
                    }
                    Err(e) if e.is_timeout() => {
                        self.ctx.state.write().await.plan_timeouts += 1;
                        warn!(stream = %stream.label(), error = %e, "Action timed out");
                        cycle.record_error(e.to_string());
                        false
                    }
                    Err(e) => {
                        error!(stream = %stream.label(), action = action.name(), error = %e, "Action failed");
                        cycle.record_error(e.to_string());
                        self.finish(cycle, false).await?;
                        return Err(e.into());
                    }
                }
            }
            action => {
                let context = self.action_context(&cycle, &plan, trigger.as_ref());
                let started = Instant::now();

                let reply_branch = reply_trigger.map(|target| {
                    let generation = generation
                        .take()
                        .unwrap_or_else(|| self.spawn_generation(target.clone(), actions.clone()));
                    AbortOnDropHandle::new(tokio::spawn(self.reply_job(generation, target, &cycle).run()))
                });
                let action_branch = {
                    let executor = self.ctx.collab.executor.clone();
                    let action = action.clone();
                    AbortOnDropHandle::new(tokio::spawn(async move {
                        executor.execute(&action, &context).await
                    }))
                };

                let reply_result = match reply_branch {
                    Some(branch) => Some(branch.await),
                    None => None,
                };
                let action_result = action_branch.await;
                cycle.record_timer("parallel", started.elapsed());

                // the reply is the primary record; the action is merged into it
                let mut taken = false;
                match reply_result {
                    Some(Ok(outcome)) => taken |= self.apply_reply(&mut cycle, outcome).await,
                    Some(Err(join)) => {
                        error!(stream = %stream.label(), error = %join, "Reply branch failed");
                        cycle.record_error(format!("reply branch failed: {join}"));
                    }
                    None => {}
                }
                match action_result {
                    Ok(Ok(outcome)) => {
                        cycle.record_action(&outcome);
                        taken |= outcome.success;
                    }
                    Ok(Err(e)) => {
                        if e.is_timeout() {
                            self.ctx.state.write().await.plan_timeouts += 1;
                        }
                        warn!(stream = %stream.label(), error = %e, "Parallel action failed");
                        cycle.record_error(e.to_string());
                    }
                    Err(join) => {
                        error!(stream = %stream.label(), error = %join, "Action branch failed");
                        cycle.record_error(format!("action branch failed: {join}"));
                    }
                }
                taken
            }
        };

        self.finish(cycle, taken).await
    }

    fn action_context(&self, cycle: &OpenCycle, plan: &PlanResult, trigger: Option<&Trigger>) -> ActionContext {
        ActionContext {
            stream: self.ctx.stream.clone(),
            cycle_id: cycle.cycle_id(),
            thinking_id: cycle.thinking_id().to_string(),
            reasoning: plan.reasoning.clone(),
            target: plan
                .target
                .clone()
                .or_else(|| trigger.and_then(Trigger::message).cloned()),
        }
    }

    async fn apply_reply(&self, cycle: &mut OpenCycle, outcome: ReplyOutcome) -> bool {
        let stream = &self.ctx.stream;
        match outcome {
            ReplyOutcome::Sent(text) => {
                self.ctx.state.write().await.consecutive_reply_timeouts = 0;
                cycle.record_reply(text);
                true
            }
            ReplyOutcome::Declined => {
                self.ctx.state.write().await.consecutive_reply_timeouts = 0;
                false
            }
            ReplyOutcome::SendFailed(reason) => {
                self.ctx.state.write().await.consecutive_reply_timeouts = 0;
                warn!(stream = %stream.label(), error = %reason, "Reply could not be delivered");
                cycle.record_error(reason);
                false
            }
            ReplyOutcome::GenerationFailed(reason) => {
                let consecutive = {
                    let mut state = self.ctx.state.write().await;
                    state.consecutive_reply_timeouts += 1;
                    state.consecutive_reply_timeouts
                };
                info!(stream = %stream.label(), consecutive, reason = %reason, "No reply produced");

                let threshold = self.ctx.config.timing.timeout_warning_threshold;
                if consecutive >= threshold {
                    warn!(
                        stream = %stream.label(),
                        consecutive,
                        timeout_secs = self.ctx.config.chat.thinking_timeout_secs,
                        "Reply generation keeps failing; check model latency or raise chat.thinking_timeout_secs"
                    );
                    self.ctx.events.publish(DomainEvent::TimeoutWarning {
                        stream_id: stream.stream_id.clone(),
                        consecutive,
                        timestamp: Utc::now(),
                    });
                }
                cycle.record_error(reason);
                false
            }
        }
    }

    async fn finish(&self, cycle: OpenCycle, taken: bool) -> Result<bool> {
        let record: CycleRecord = cycle.seal();

        let timers = format_timers(&record.timers);
        info!(
            stream = %self.ctx.stream.label(),
            cycle = record.cycle_id,
            elapsed = %format!("{:.1}s", record.elapsed.as_secs_f64()),
            action = record.action_name(),
            taken,
            "Cycle complete{}",
            if timers.is_empty() { String::new() } else { format!(" ({timers})") }
        );

        self.ctx.events.publish(DomainEvent::CycleCompleted {
            stream_id: self.ctx.stream.stream_id.clone(),
            cycle_id: record.cycle_id,
            action: record.action_name().to_string(),
            taken,
            elapsed: record.elapsed,
            timestamp: Utc::now(),
        });

        self.ctx.state.write().await.push_record(record);
        Ok(taken)
    }
}
