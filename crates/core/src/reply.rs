//! Reply generation and delivery traits.
//!
//! A generator turns a trigger into a sequence of [`ReplySegment`]s; a sender
//! delivers one segment at a time. How the text is produced (prompts, models)
//! and how it travels over the wire are both outside the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::ActionSet;
use crate::error::{GenerationError, SendError};
use crate::message::{StreamInfo, Trigger};

/// One unit of a generated reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ReplySegment {
    Text(String),
    /// Sticker / emoji reference, sent as-is
    Emoji(String),
}

impl ReplySegment {
    pub fn text(content: impl Into<String>) -> Self {
        ReplySegment::Text(content.into())
    }

    pub fn content(&self) -> &str {
        match self {
            ReplySegment::Text(s) | ReplySegment::Emoji(s) => s,
        }
    }
}

/// Concatenate the text segments of a reply, ignoring emoji.
pub fn joined_text(segments: &[ReplySegment]) -> String {
    segments
        .iter()
        .filter_map(|s| match s {
            ReplySegment::Text(t) => Some(t.as_str()),
            ReplySegment::Emoji(_) => None,
        })
        .collect()
}

/// Per-segment delivery options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Message id to quote, when threading the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,

    /// Show a typing indicator before delivery
    #[serde(default)]
    pub typing: bool,
}

/// Produces reply segments for a trigger.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        stream: &StreamInfo,
        trigger: &Trigger,
        actions: &ActionSet,
    ) -> std::result::Result<Vec<ReplySegment>, GenerationError>;
}

/// Delivers reply segments to the conversation.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(
        &self,
        stream: &StreamInfo,
        segment: &ReplySegment,
        options: &SendOptions,
    ) -> std::result::Result<(), SendError>;
}
