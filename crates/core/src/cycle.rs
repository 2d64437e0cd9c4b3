//! Per-conversation cycle state and the sealed cycle history.
//!
//! `CycleState` is the only mutable state a conversation loop owns. The driver
//! task holds the write side; the energy tick and the proactive check take the
//! lock briefly and only touch the fields documented on each method.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::action::ActionOutcome;
use crate::message::StreamInfo;
use crate::planner::PlanResult;

/// Operating mode of a conversation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Low engagement: messages are gated one at a time by willingness
    #[default]
    Idle,
    /// High engagement: every batch of new messages runs the full pipeline
    Engaged,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMode::Idle => write!(f, "idle"),
            ChatMode::Engaged => write!(f, "engaged"),
        }
    }
}

/// What a cycle actually did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Whether anything observable happened (reply sent or action succeeded)
    pub taken: bool,

    #[serde(default)]
    pub reply_text: String,

    #[serde(default)]
    pub command: String,

    /// Outcome of the non-reply action, when one ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An immutable history entry for one pass of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: u64,
    pub thinking_id: String,
    pub mode: ChatMode,
    /// Message or proactive trigger id this cycle responded to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanResult>,
    pub action: ActionRecord,
    pub timers: BTreeMap<String, Duration>,
}

impl CycleRecord {
    /// Name of the chosen action, or `"none"` if planning never finished.
    pub fn action_name(&self) -> &str {
        self.plan.as_ref().map(|p| p.action.name()).unwrap_or("none")
    }
}

/// A cycle in progress. Consumed by [`OpenCycle::seal`].
#[derive(Debug)]
pub struct OpenCycle {
    cycle_id: u64,
    thinking_id: String,
    mode: ChatMode,
    trigger_id: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
    plan: Option<PlanResult>,
    action: ActionRecord,
    timers: BTreeMap<String, Duration>,
}

impl OpenCycle {
    pub fn new(cycle_id: u64, mode: ChatMode, trigger_id: Option<String>) -> Self {
        Self {
            cycle_id,
            thinking_id: format!("tid{}", Uuid::new_v4().simple()),
            mode,
            trigger_id,
            started_at: Utc::now(),
            started: Instant::now(),
            plan: None,
            action: ActionRecord::default(),
            timers: BTreeMap::new(),
        }
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    pub fn thinking_id(&self) -> &str {
        &self.thinking_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn set_plan(&mut self, plan: PlanResult) {
        self.plan = Some(plan);
    }

    pub fn plan(&self) -> Option<&PlanResult> {
        self.plan.as_ref()
    }

    pub fn record_timer(&mut self, name: impl Into<String>, elapsed: Duration) {
        self.timers.insert(name.into(), elapsed);
    }

    /// Record a reply that was actually delivered.
    pub fn record_reply(&mut self, text: impl Into<String>) {
        self.action.taken = true;
        self.action.reply_text = text.into();
    }

    /// Merge a non-reply action outcome into the record.
    ///
    /// A reply already recorded stays the primary text; the action's own text
    /// is only used when no reply was sent.
    pub fn record_action(&mut self, outcome: &ActionOutcome) {
        self.action.action_success = Some(outcome.success);
        self.action.taken |= outcome.success;
        self.action.command = outcome.command.clone();
        if self.action.reply_text.is_empty() {
            self.action.reply_text = outcome.reply_text.clone();
        }
    }

    /// Record a failure. Several failures in one cycle are joined with `; `.
    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.action.error = Some(match self.action.error.take() {
            Some(previous) => format!("{previous}; {error}"),
            None => error,
        });
    }

    pub fn seal(self) -> CycleRecord {
        CycleRecord {
            cycle_id: self.cycle_id,
            thinking_id: self.thinking_id,
            mode: self.mode,
            trigger_id: self.trigger_id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            elapsed: self.started.elapsed(),
            plan: self.plan,
            action: self.action,
            timers: self.timers,
        }
    }
}

/// Inclusive energy range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyBounds {
    pub floor: f64,
    pub ceiling: f64,
}

impl EnergyBounds {
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.floor;
        }
        value.clamp(self.floor, self.ceiling)
    }
}

impl Default for EnergyBounds {
    fn default() -> Self {
        Self {
            floor: 0.3,
            ceiling: 100.0,
        }
    }
}

/// Mutable state of one conversation loop.
#[derive(Debug)]
pub struct CycleState {
    stream: StreamInfo,
    mode: ChatMode,
    energy: f64,
    bounds: EnergyBounds,

    /// Read cursor into the message store
    pub last_read_time: DateTime<Utc>,

    /// Last time a message arrived (or a proactive trigger fired)
    pub last_message_at: Instant,

    /// Consecutive reply generations that timed out or came back empty
    pub consecutive_reply_timeouts: u32,

    /// Planner and action timeouts, cumulative
    pub plan_timeouts: u32,

    cycle_counter: u64,
    history: VecDeque<CycleRecord>,
    retention: usize,
}

impl CycleState {
    pub fn new(stream: StreamInfo, bounds: EnergyBounds, initial_energy: f64, retention: usize) -> Self {
        Self {
            stream,
            mode: ChatMode::Idle,
            energy: bounds.clamp(initial_energy),
            bounds,
            last_read_time: Utc::now(),
            last_message_at: Instant::now(),
            consecutive_reply_timeouts: 0,
            plan_timeouts: 0,
            cycle_counter: 0,
            history: VecDeque::with_capacity(retention.min(64)),
            retention: retention.max(1),
        }
    }

    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    /// Switch mode. Returns `true` if the mode actually changed.
    pub fn set_mode(&mut self, mode: ChatMode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        changed
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn bounds(&self) -> EnergyBounds {
        self.bounds
    }

    /// Write energy, clamped to the configured bounds.
    ///
    /// Only the energy model and mode-forcing rules call this.
    pub fn set_energy(&mut self, value: f64) {
        self.energy = self.bounds.clamp(value);
    }

    /// Allocate the next cycle id and open a record for it.
    pub fn open_cycle(&mut self, trigger_id: Option<String>) -> OpenCycle {
        self.cycle_counter += 1;
        OpenCycle::new(self.cycle_counter, self.mode, trigger_id)
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_counter
    }

    /// Append a sealed record, evicting the oldest beyond retention.
    pub fn push_record(&mut self, record: CycleRecord) {
        if self.history.len() == self.retention
            && let Some(evicted) = self.history.pop_front()
        {
            tracing::trace!(stream = %self.stream.stream_id, cycle = evicted.cycle_id, "Evicted cycle record");
        }
        self.history.push_back(record);
    }

    pub fn history(&self) -> impl Iterator<Item = &CycleRecord> {
        self.history.iter()
    }

    pub fn last_record(&self) -> Option<&CycleRecord> {
        self.history.back()
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            stream_id: self.stream.stream_id.clone(),
            mode: self.mode,
            energy: self.energy,
            cycle_count: self.cycle_counter,
            consecutive_reply_timeouts: self.consecutive_reply_timeouts,
            plan_timeouts: self.plan_timeouts,
            history_len: self.history.len(),
            last_read_time: self.last_read_time,
        }
    }
}

/// Point-in-time view of a conversation for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub stream_id: String,
    pub mode: ChatMode,
    pub energy: f64,
    pub cycle_count: u64,
    pub consecutive_reply_timeouts: u32,
    pub plan_timeouts: u32,
    pub history_len: usize,
    pub last_read_time: DateTime<Utc>,
}
