//! Willingness collaborator: conversation-level appetite for replying.

use async_trait::async_trait;

use crate::message::ChatMessage;

/// Tracks how willing the bot is to reply, per message.
///
/// The gate asks for a score, then reports back exactly one of
/// `on_reply_decided` / `on_reply_skipped` so the tracker can clear its entry.
#[async_trait]
pub trait Willingness: Send + Sync {
    /// Score in `[0, 1]`.
    async fn reply_probability(&self, message: &ChatMessage) -> f64;

    async fn on_reply_decided(&self, message_id: &str);

    async fn on_reply_skipped(&self, message_id: &str);
}

/// A tracker that is always fully willing and keeps no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysWilling;

#[async_trait]
impl Willingness for AlwaysWilling {
    async fn reply_probability(&self, _message: &ChatMessage) -> f64 {
        1.0
    }

    async fn on_reply_decided(&self, _message_id: &str) {}

    async fn on_reply_skipped(&self, _message_id: &str) {}
}
