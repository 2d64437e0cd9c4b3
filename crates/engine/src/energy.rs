//! Energy model: the scalar that decides between idle and engaged.
//!
//! Energy decays on a fixed tick and grows when the bot takes part in the
//! conversation. The driver applies the growth and threshold rules; the tick
//! task applies decay. Group chats with a forced mode pin both values and
//! skip every other rule.

use std::time::Duration;

use chatloop_config::{AppConfig, EnergyConfig, GroupMode};
use chatloop_core::cycle::{ChatMode, CycleState, EnergyBounds};
use chatloop_core::error::Result;
use chatloop_core::event::DomainEvent;
use chatloop_core::message::{ChatKind, StreamInfo};
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::LoopContext;

/// A mode transition, reported so the caller can publish it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeChange {
    pub from: ChatMode,
    pub to: ChatMode,
    pub energy: f64,
}

impl ModeChange {
    pub fn into_event(self, stream_id: &str) -> DomainEvent {
        DomainEvent::ModeChanged {
            stream_id: stream_id.to_string(),
            from: self.from,
            to: self.to,
            energy: self.energy,
            timestamp: Utc::now(),
        }
    }
}

fn switch(state: &mut CycleState, to: ChatMode) -> Option<ModeChange> {
    let from = state.mode();
    state.set_mode(to).then(|| ModeChange {
        from,
        to,
        energy: state.energy(),
    })
}

#[derive(Debug, Clone)]
pub struct EnergyModel {
    energy: EnergyConfig,
    focus_value: f64,
    group_mode: GroupMode,
    force_focus_private: bool,
}

impl EnergyModel {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            energy: config.energy.clone(),
            focus_value: config.chat.focus_value,
            group_mode: config.chat.group_mode,
            force_focus_private: config.chat.force_focus_private,
        }
    }

    pub fn bounds(&self) -> EnergyBounds {
        EnergyBounds {
            floor: self.energy.floor,
            ceiling: self.energy.ceiling,
        }
    }

    /// The pinned mode for this stream, if its kind has one configured.
    pub fn forced_mode(&self, stream: &StreamInfo) -> Option<ChatMode> {
        if stream.kind != ChatKind::Group {
            return None;
        }
        match self.group_mode {
            GroupMode::Auto => None,
            GroupMode::Engaged => Some(ChatMode::Engaged),
            GroupMode::Idle => Some(ChatMode::Idle),
        }
    }

    pub fn is_forced(&self, stream: &StreamInfo) -> bool {
        self.forced_mode(stream).is_some()
    }

    fn keeps_private_focus(&self, stream: &StreamInfo) -> bool {
        self.force_focus_private && stream.kind == ChatKind::Private
    }

    /// Fresh state for a newly started loop, already pinned if forced.
    pub fn initial_state(&self, stream: StreamInfo, retention: usize) -> CycleState {
        let mut state = CycleState::new(stream, self.bounds(), self.energy.cold_start, retention);
        self.pin(&mut state);
        state
    }

    /// Apply the forced mode and energy, if any. Returns the transition made.
    pub fn pin(&self, state: &mut CycleState) -> Option<ModeChange> {
        let mode = self.forced_mode(state.stream())?;
        let energy = match mode {
            ChatMode::Engaged => self.energy.forced_engaged,
            ChatMode::Idle => self.energy.forced_idle,
        };
        state.set_energy(energy);
        switch(state, mode)
    }

    /// One decay step.
    pub fn tick(&self, state: &mut CycleState) -> Option<ModeChange> {
        if self.is_forced(state.stream()) {
            return self.pin(state);
        }
        let step = match state.mode() {
            ChatMode::Idle => self.energy.idle_decay,
            ChatMode::Engaged => self.energy.engaged_decay,
        };
        state.set_energy(state.energy() - step);
        None
    }

    /// New-message count above which an idle loop engages immediately.
    ///
    /// `None` when the engagement factor is zero (never engage on volume).
    pub fn activation_threshold(&self) -> Option<f64> {
        (self.focus_value > 0.0).then(|| 3.0 / self.focus_value.sqrt())
    }

    /// Decide whether an idle loop should engage, given the new-message count.
    pub fn idle_transition(&self, state: &mut CycleState, new_messages: usize) -> Option<ModeChange> {
        if self.keeps_private_focus(state.stream()) {
            state.set_energy(self.energy.engaged_seed);
            return switch(state, ChatMode::Engaged);
        }

        if self.is_forced(state.stream()) {
            return None;
        }

        let threshold = self.activation_threshold()?;
        let count = new_messages as f64;
        if count > threshold {
            let seed = self.energy.engaged_seed;
            state.set_energy(seed + (count / threshold) * seed);
            return switch(state, ChatMode::Engaged);
        }

        if state.energy() >= self.energy.engage_threshold {
            return switch(state, ChatMode::Engaged);
        }

        None
    }

    /// Growth after an idle message was gated: multiplicative if a reply
    /// happened, additive otherwise.
    pub fn after_idle_response(&self, state: &mut CycleState, responded: bool) {
        if self.is_forced(state.stream()) {
            return;
        }
        if responded {
            let factor = self.focus_value.max(0.1);
            state.set_energy(state.energy() * 1.1 * factor);
        } else {
            state.set_energy(state.energy() + 0.1 * self.focus_value);
        }
    }

    /// Growth after a successful engaged pass.
    pub fn after_engaged_observe(&self, state: &mut CycleState) {
        if self.is_forced(state.stream()) || self.focus_value <= 0.0 {
            return;
        }
        state.set_energy(state.energy() + 1.0 / self.focus_value);
    }

    /// Disengagement rules, evaluated after every engaged tick.
    pub fn engaged_transition(&self, state: &mut CycleState) -> Option<ModeChange> {
        if self.keeps_private_focus(state.stream()) {
            if state.energy() <= self.energy.disengage_threshold {
                state.set_energy(self.energy.private_reset);
            }
            return None;
        }

        if self.forced_mode(state.stream()) == Some(ChatMode::Engaged) {
            return None;
        }

        if state.energy() <= self.energy.disengage_threshold {
            state.set_energy(self.energy.disengage_threshold);
            return switch(state, ChatMode::Idle);
        }

        None
    }
}

/// Rate-limits energy logging: one `info!` per window, `debug!` otherwise.
#[derive(Debug)]
pub struct EnergyLog {
    window: Duration,
    last_info: Option<Instant>,
}

impl EnergyLog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_info: None,
        }
    }

    /// Returns `true` if the line went out at info level.
    pub fn record(&mut self, stream: &str, reason: &str, energy: f64) -> bool {
        let now = Instant::now();
        let due = self
            .last_info
            .is_none_or(|last| now.duration_since(last) >= self.window);
        if due {
            self.last_info = Some(now);
            info!(stream = %stream, energy = %format!("{energy:.1}"), "{reason}");
        } else {
            debug!(stream = %stream, energy = %format!("{energy:.1}"), "{reason}");
        }
        due
    }
}

impl Default for EnergyLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(90))
    }
}

/// The energy tick task. Runs until cancelled.
pub async fn run_ticks(ctx: LoopContext, model: EnergyModel, cancel: CancellationToken) -> Result<()> {
    let period = ctx.config.timing.energy_tick();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(period) => {}
        }

        let change = {
            let mut state = ctx.state.write().await;
            let change = model.tick(&mut state);
            debug!(stream = %ctx.stream_id(), energy = state.energy(), mode = %state.mode(), "Energy tick");
            change
        };

        if let Some(change) = change {
            info!(stream = %ctx.stream_id(), from = %change.from, to = %change.to, "Mode pinned by group setting");
            ctx.events.publish(change.into_event(ctx.stream_id()));
        }
    }
}
