//! Reply delivery policy: quoting, typing indicators, and silence.

use std::sync::Arc;

use chatloop_core::error::SendError;
use chatloop_core::message::{StreamInfo, Trigger};
use chatloop_core::reply::{ReplySegment, ReplySender, SendOptions, joined_text};
use chatloop_core::store::MessageStore;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

/// What happened when a generated reply was handed to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Segments went out; carries the text that was sent
    Sent(String),
    /// The generator chose to stay silent; nothing was transmitted
    Declined,
}

/// Draw the quoting threshold: quote once at least this many messages
/// arrived while the reply was being produced.
pub fn quote_threshold<R: Rng + ?Sized>(rng: &mut R) -> usize {
    rng.random_range(2..=4)
}

/// Sends generated segments for one cycle.
#[derive(Clone)]
pub struct ResponseSender {
    sender: Arc<dyn ReplySender>,
    store: Arc<dyn MessageStore>,
    silence_marker: String,
}

impl ResponseSender {
    pub fn new(
        sender: Arc<dyn ReplySender>,
        store: Arc<dyn MessageStore>,
        silence_marker: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            store,
            silence_marker: silence_marker.into(),
        }
    }

    /// Whether a reply is just the "decline to speak" marker.
    pub fn is_silence(&self, segments: &[ReplySegment]) -> bool {
        let text = joined_text(segments);
        let text = text.trim();
        !self.silence_marker.is_empty() && text == self.silence_marker
    }

    /// Deliver `segments` in order.
    ///
    /// The first segment quotes the triggering message when `quote_after` or
    /// more messages arrived since `cycle_started`; later segments show a
    /// typing indicator.
    pub async fn send(
        &self,
        stream: &StreamInfo,
        trigger: &Trigger,
        segments: &[ReplySegment],
        cycle_started: DateTime<Utc>,
        quote_after: usize,
    ) -> Result<Delivery, SendError> {
        if self.is_silence(segments) {
            info!(stream = %stream.label(), trigger = %trigger.id(), "Chose to stay silent");
            return Ok(Delivery::Declined);
        }

        let quote = match trigger.message() {
            Some(target) => {
                let arrived = match self.store.count_since(&stream.stream_id, cycle_started).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(stream = %stream.label(), error = %e, "Could not count new messages, not quoting");
                        0
                    }
                };
                debug!(stream = %stream.label(), arrived, quote_after, "Messages since cycle start");
                (arrived >= quote_after).then(|| target.id.clone())
            }
            None => None,
        };

        let mut sent = String::new();
        for (index, segment) in segments.iter().enumerate() {
            let options = SendOptions {
                quote: if index == 0 { quote.clone() } else { None },
                typing: index > 0,
            };
            self.sender.send(stream, segment, &options).await?;
            if let ReplySegment::Text(text) = segment {
                sent.push_str(text);
            }
        }

        Ok(Delivery::Sent(sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingSender, group_stream};
    use chatloop_core::message::ChatMessage;
    use chatloop_store::InMemoryMessageStore;
    use chrono::Duration;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration as StdDuration;

    fn segments() -> Vec<ReplySegment> {
        vec![
            ReplySegment::text("first"),
            ReplySegment::Emoji("smile".into()),
            ReplySegment::text(" second"),
        ]
    }

    #[test]
    fn threshold_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            assert!((2..=4).contains(&quote_threshold(&mut rng)));
        }
    }

    #[tokio::test]
    async fn quiet_chat_sends_without_quote() {
        let sender = Arc::new(RecordingSender::default());
        let store = InMemoryMessageStore::new();
        let responder = ResponseSender::new(sender.clone(), Arc::new(store), "[silence]");
        let stream = group_stream();
        let target = ChatMessage::text(&stream.stream_id, "alice", "hi");

        let delivery = responder
            .send(&stream, &Trigger::Message(target), &segments(), Utc::now(), 2)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Sent("first second".into()));

        let sent = sender.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].1, SendOptions { quote: None, typing: false });
        assert!(sent[1].1.typing && sent[2].1.typing);
    }

    #[tokio::test]
    async fn busy_chat_quotes_first_segment_only() {
        let sender = Arc::new(RecordingSender::default());
        let store = InMemoryMessageStore::new();
        let stream = group_stream();
        let started = Utc::now() - Duration::seconds(10);
        for i in 0..3 {
            store
                .push(ChatMessage::text(&stream.stream_id, "bob", format!("msg {i}")))
                .await;
        }
        let responder = ResponseSender::new(sender.clone(), Arc::new(store), "[silence]");
        let target = ChatMessage::text(&stream.stream_id, "alice", "question?");

        responder
            .send(&stream, &Trigger::Message(target.clone()), &segments(), started, 3)
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent[0].1.quote.as_deref(), Some(target.id.as_str()));
        assert!(sent[1].1.quote.is_none());
    }

    #[tokio::test]
    async fn proactive_never_quotes() {
        let sender = Arc::new(RecordingSender::default());
        let store = InMemoryMessageStore::new();
        let stream = group_stream();
        for _ in 0..5 {
            store.push(ChatMessage::text(&stream.stream_id, "bob", "x")).await;
        }
        let responder = ResponseSender::new(sender.clone(), Arc::new(store), "[silence]");
        let trigger = Trigger::proactive(StdDuration::from_secs(900), "quiet");

        responder
            .send(
                &stream,
                &trigger,
                &[ReplySegment::text("anyone around?")],
                Utc::now() - Duration::seconds(60),
                2,
            )
            .await
            .unwrap();
        assert!(sender.sent()[0].1.quote.is_none());
    }

    #[tokio::test]
    async fn silence_marker_is_never_sent() {
        let sender = Arc::new(RecordingSender::default());
        let responder =
            ResponseSender::new(sender.clone(), Arc::new(InMemoryMessageStore::new()), "[silence]");
        let trigger = Trigger::proactive(StdDuration::from_secs(900), "quiet");

        let delivery = responder
            .send(
                &group_stream(),
                &trigger,
                &[ReplySegment::text("  [silence] ")],
                Utc::now(),
                2,
            )
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Declined);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn send_failure_propagates() {
        let sender = Arc::new(RecordingSender::failing());
        let responder =
            ResponseSender::new(sender, Arc::new(InMemoryMessageStore::new()), "[silence]");
        let target = ChatMessage::text("g1", "alice", "hi");
        let result = responder
            .send(&group_stream(), &Trigger::Message(target), &segments(), Utc::now(), 2)
            .await;
        assert!(matches!(result, Err(SendError::DeliveryFailed { .. })));
    }
}
