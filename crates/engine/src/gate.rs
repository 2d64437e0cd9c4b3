//! Willingness gate: the idle-mode decision to answer a single message.

use std::sync::Arc;

use chatloop_core::message::{ChatMessage, StreamInfo};
use chatloop_core::willingness::Willingness;
use tracing::{debug, info};

/// Below this probability the gate logs at debug level only.
const NOTABLE_PROBABILITY: f64 = 0.05;

/// Reply probability for one message.
///
/// `clamp(interest × talk_frequency, 0, 1) × willingness`, or zero for
/// image/sticker-only content.
pub fn reply_probability(message: &ChatMessage, talk_frequency: f64, willingness: f64) -> f64 {
    if message.is_media_only() {
        return 0.0;
    }
    let base = (message.interest * talk_frequency).clamp(0.0, 1.0);
    (base * willingness.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Apply a message's additive gain to a willingness score below 1.
pub fn apply_gain(willingness: f64, gain: Option<f64>) -> f64 {
    match gain {
        Some(gain) if willingness < 1.0 => (willingness + gain).clamp(0.0, 1.0),
        _ => willingness,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub probability: f64,
    pub reply: bool,
}

pub struct WillingnessGate {
    willingness: Arc<dyn Willingness>,
}

impl WillingnessGate {
    pub fn new(willingness: Arc<dyn Willingness>) -> Self {
        Self { willingness }
    }

    /// Decide whether to answer `message`, given a uniform roll in `[0, 1)`.
    ///
    /// The willingness tracker is told the outcome either way.
    pub async fn evaluate(
        &self,
        stream: &StreamInfo,
        message: &ChatMessage,
        talk_frequency: f64,
        roll: f64,
    ) -> GateDecision {
        let willingness = self.willingness.reply_probability(message).await;
        let willingness = apply_gain(willingness, message.probability_gain);
        let probability = reply_probability(message, talk_frequency, willingness);

        if probability > NOTABLE_PROBABILITY {
            info!(
                stream = %stream.label(),
                sender = message.sender_name.as_deref().unwrap_or(&message.sender_id),
                interest = %format!("{:.2}", message.interest),
                probability = %format!("{:.1}%", probability * 100.0),
                "{}",
                message.text
            );
        } else {
            debug!(stream = %stream.label(), probability, "Low reply probability");
        }

        let reply = roll < probability;
        if reply {
            self.willingness.on_reply_decided(&message.id).await;
        } else {
            self.willingness.on_reply_skipped(&message.id).await;
        }

        GateDecision { probability, reply }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatloop_core::message::ContentKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingWillingness {
        score: f64,
        decided: Mutex<Vec<String>>,
        skipped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Willingness for TrackingWillingness {
        async fn reply_probability(&self, _message: &ChatMessage) -> f64 {
            self.score
        }

        async fn on_reply_decided(&self, message_id: &str) {
            self.decided.lock().unwrap().push(message_id.to_string());
        }

        async fn on_reply_skipped(&self, message_id: &str) {
            self.skipped.lock().unwrap().push(message_id.to_string());
        }
    }

    fn msg(interest: f64) -> ChatMessage {
        ChatMessage::text("s", "alice", "anyone up for lunch?").with_interest(interest)
    }

    #[test]
    fn probability_formula() {
        assert!((reply_probability(&msg(0.5), 1.0, 1.0) - 0.5).abs() < 1e-9);
        assert!((reply_probability(&msg(0.5), 0.5, 0.5) - 0.125).abs() < 1e-9);
        // interest × frequency is clamped before willingness applies
        assert!((reply_probability(&msg(0.8), 3.0, 0.5) - 0.5).abs() < 1e-9);
        assert_eq!(reply_probability(&msg(-1.0), 1.0, 1.0), 0.0);
    }

    #[test]
    fn media_only_never_replies() {
        let mut m = msg(1.0);
        m.content_kind = ContentKind::Image;
        assert_eq!(reply_probability(&m, 1.0, 1.0), 0.0);
    }

    #[test]
    fn gain_only_applies_below_one() {
        assert!((apply_gain(0.3, Some(0.5)) - 0.8).abs() < 1e-9);
        assert_eq!(apply_gain(0.9, Some(0.5)), 1.0);
        assert_eq!(apply_gain(0.2, Some(-1.0)), 0.0);
        assert_eq!(apply_gain(1.0, Some(-0.5)), 1.0);
        assert_eq!(apply_gain(0.4, None), 0.4);
    }

    #[tokio::test]
    async fn decided_and_skipped_are_reported() {
        let willingness = Arc::new(TrackingWillingness {
            score: 1.0,
            ..Default::default()
        });
        let gate = WillingnessGate::new(willingness.clone());
        let stream = StreamInfo::group("s", "1");

        let yes = msg(0.6);
        let decision = gate.evaluate(&stream, &yes, 1.0, 0.59).await;
        assert!(decision.reply);

        let no = msg(0.6);
        let decision = gate.evaluate(&stream, &no, 1.0, 0.61).await;
        assert!(!decision.reply);

        assert_eq!(*willingness.decided.lock().unwrap(), vec![yes.id.clone()]);
        assert_eq!(*willingness.skipped.lock().unwrap(), vec![no.id.clone()]);
    }

    #[tokio::test]
    async fn zero_roll_never_beats_zero_probability() {
        let gate = WillingnessGate::new(Arc::new(TrackingWillingness::default()));
        let stream = StreamInfo::group("s", "1");
        let decision = gate.evaluate(&stream, &msg(1.0), 1.0, 0.0).await;
        assert_eq!(decision.probability, 0.0);
        assert!(!decision.reply);
    }
}
