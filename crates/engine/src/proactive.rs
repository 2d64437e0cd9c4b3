//! Proactive scheduler: speak first after a stretch of silence.
//!
//! A background task checks, on a fixed period, how long the conversation has
//! been quiet. Each check draws a fresh target interval from a normal
//! distribution; once silence reaches it, a synthetic [`Trigger::Proactive`]
//! is handed to the driver, which runs it through the same pipeline as a real
//! message.

use std::time::Duration;

use chatloop_config::{ProactiveConfig, ProactiveScope};
use chatloop_core::cycle::ChatMode;
use chatloop_core::error::{Error, Result};
use chatloop_core::event::DomainEvent;
use chatloop_core::message::{ChatKind, StreamInfo, Trigger};
use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::LoopContext;

pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 86_400;
/// Used when both the base interval and its spread are zero
pub const FALLBACK_INTERVAL_SECS: u64 = 300;

const PRIVATE_PROMPT: &str = "It has been {time} since anyone wrote in this private chat. \
Looking at the conversation so far, the topics you and your friend covered and your persona, \
decide whether to send a message. Stay silent if the last topic was wrapped up and you have \
nothing new to raise; speak if your last message went unanswered or you want to start a new \
topic. If you speak, write only the message. If you stay silent, answer exactly \"{marker}\".";

const GROUP_PROMPT: &str = "It has been {time} since anyone wrote in this group. \
Looking at the conversation so far, the topics the group covered and your persona, \
decide whether to send a message. Stay silent if the last topic was wrapped up and you have \
nothing new to raise; speak if your last message went unanswered or you want to start a new \
topic. If you speak, write only the message. If you stay silent, answer exactly \"{marker}\".";

/// A standard normal draw (Box–Muller).
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // 1 - u keeps the logarithm finite
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn clamp_secs(value: f64) -> u64 {
    (value.round() as u64).clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}

/// Draw the silence target, in seconds.
///
/// Normally distributed around `base` with standard deviation `delta`,
/// truncated at three sigma and clamped to `[1, 86400]`. Negative inputs are
/// taken by absolute value.
pub fn compute_interval<R: Rng + ?Sized>(base: i64, delta: i64, rng: &mut R) -> u64 {
    if base < 0 {
        warn!(base, "Proactive interval is negative, using its absolute value");
    }
    if delta < 0 {
        warn!(delta, "Proactive delta_sigma is negative, using its absolute value");
    }
    let base = base.unsigned_abs();
    let delta = delta.unsigned_abs();

    match (base, delta) {
        (0, 0) => {
            warn!(
                fallback = FALLBACK_INTERVAL_SECS,
                "Proactive interval and delta are both zero, using fallback"
            );
            FALLBACK_INTERVAL_SECS
        }
        (0, delta) => {
            let z = standard_normal(rng).clamp(-3.0, 3.0);
            let secs = clamp_secs((z * delta as f64).abs());
            debug!(delta, secs, "Pure random proactive interval");
            secs
        }
        (base, 0) => base.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS),
        (base, delta) => {
            let z = standard_normal(rng).clamp(-3.0, 3.0);
            clamp_secs(base as f64 + z * delta as f64)
        }
    }
}

/// The theoretical `[min, max]` of [`compute_interval`] under the 3-sigma rule.
pub fn three_sigma_range(base: i64, delta: i64) -> (u64, u64) {
    let base = base.unsigned_abs();
    let delta = delta.unsigned_abs();
    match (base, delta) {
        (0, 0) => (FALLBACK_INTERVAL_SECS, FALLBACK_INTERVAL_SECS),
        (0, delta) => (
            MIN_INTERVAL_SECS,
            delta.saturating_mul(3).clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS),
        ),
        (base, delta) => (
            base.saturating_sub(delta.saturating_mul(3)).max(MIN_INTERVAL_SECS),
            base.saturating_add(delta.saturating_mul(3)).min(MAX_INTERVAL_SECS),
        ),
    }
}

/// Render a duration as `1h2m3s`, omitting zero hour and minute parts.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if secs > 0 || out.is_empty() {
        out.push_str(&format!("{secs}s"));
    }
    out
}

/// Prompt describing the silence to the generator.
pub fn proactive_prompt(config: &ProactiveConfig, kind: ChatKind, silence: Duration) -> String {
    let template = match config.prompt_template.as_deref().map(str::trim) {
        Some(custom) if !custom.is_empty() => custom,
        _ => match kind {
            ChatKind::Private => PRIVATE_PROMPT,
            ChatKind::Group => GROUP_PROMPT,
        },
    };
    template
        .replace("{time}", &format_duration(silence))
        .replace("{marker}", &config.silence_marker)
}

/// Whether proactive messages may fire in this stream at all.
pub fn is_enabled_for(config: &ProactiveConfig, stream: &StreamInfo) -> bool {
    if !config.enabled || !config.allows_chat(&stream.chat_id) {
        return false;
    }

    let kind_enabled = match stream.kind {
        ChatKind::Group => config.in_group,
        ChatKind::Private => config.in_private,
    };
    if !kind_enabled {
        return false;
    }

    match config.scope() {
        Ok(ProactiveScope::All) => true,
        Ok(ProactiveScope::Group) => stream.kind == ChatKind::Group,
        Ok(ProactiveScope::Private) => stream.kind == ChatKind::Private,
        Err(_) => false,
    }
}

/// One check. Returns the trigger that was sent, if any.
pub async fn check_once(ctx: &LoopContext, triggers: &mpsc::Sender<Trigger>) -> Result<Option<Trigger>> {
    let proactive = &ctx.config.proactive;

    let silence = {
        let state = ctx.state.read().await;
        if state.mode() != ChatMode::Engaged {
            return Ok(None);
        }
        state.last_message_at.elapsed()
    };

    if !is_enabled_for(proactive, &ctx.stream) {
        return Ok(None);
    }

    if ctx.collab.is_sleeping().await {
        debug!(stream = %ctx.stream_id(), "Sleeping, proactive check skipped");
        return Ok(None);
    }

    let target = Duration::from_secs(compute_interval(
        proactive.interval_secs,
        proactive.delta_sigma,
        &mut rand::rng(),
    ));

    if silence < target {
        debug!(
            stream = %ctx.stream_id(),
            silence_secs = silence.as_secs(),
            target_secs = target.as_secs(),
            "Silence below proactive target"
        );
        return Ok(None);
    }

    ctx.state.write().await.last_message_at = Instant::now();

    info!(
        stream = %ctx.stream.label(),
        silence = %format_duration(silence),
        "Silence exceeded, speaking first"
    );
    ctx.events.publish(DomainEvent::ProactiveTriggered {
        stream_id: ctx.stream_id().to_string(),
        silence,
        target,
        timestamp: Utc::now(),
    });

    let trigger = Trigger::proactive(silence, proactive_prompt(proactive, ctx.stream.kind, silence));
    triggers
        .send(trigger.clone())
        .await
        .map_err(|_| Error::Internal("driver stopped receiving proactive triggers".into()))?;
    Ok(Some(trigger))
}

/// The proactive check task. Runs until cancelled.
pub async fn run_checks(
    ctx: LoopContext,
    triggers: mpsc::Sender<Trigger>,
    cancel: CancellationToken,
) -> Result<()> {
    let period = ctx.config.timing.proactive_check();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(period) => {}
        }
        check_once(&ctx, &triggers).await?;
    }
}
