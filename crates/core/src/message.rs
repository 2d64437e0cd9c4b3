//! Chat message and conversation identity types.
//!
//! These are the value objects that flow through a conversation loop:
//! the store yields `ChatMessage`s → the driver wraps one in a `Trigger` →
//! the pipeline hands the trigger to the planner and generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Whether a conversation is a direct-message thread or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn is_group(self) -> bool {
        matches!(self, ChatKind::Group)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }
}

/// Immutable identity of one conversation (stream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream identifier used by every collaborator
    pub stream_id: String,

    /// Direct message or group
    pub kind: ChatKind,

    /// Platform-level chat id (group number, peer id); matched against allow-lists
    pub chat_id: String,

    /// Human-readable name, used as the log prefix when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StreamInfo {
    pub fn private(stream_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            kind: ChatKind::Private,
            chat_id: chat_id.into(),
            name: None,
        }
    }

    pub fn group(stream_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            kind: ChatKind::Group,
            chat_id: chat_id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Label used in log lines.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.stream_id)
    }
}

/// What a message carries, as far as reply gating is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Text,
    Image,
    Sticker,
}

/// A chat message as read back from the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: String,

    /// Stream this message belongs to
    pub stream_id: String,

    /// Platform user id of the sender
    pub sender_id: String,

    /// Display name of the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// Plain-text rendering of the content
    pub text: String,

    #[serde(default)]
    pub content_kind: ContentKind,

    /// When the message was stored
    pub timestamp: DateTime<Utc>,

    /// Interest score assigned upstream (0.0 when unknown)
    #[serde(default)]
    pub interest: f64,

    /// Whether the bot was @-mentioned or named
    #[serde(default)]
    pub is_mentioned: bool,

    /// Whether this message was sent by the bot itself
    #[serde(default)]
    pub from_self: bool,

    /// Whether this message is a bot command (e.g. `/help`)
    #[serde(default)]
    pub is_command: bool,

    /// Additive reply-probability gain requested by the adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability_gain: Option<f64>,
}

impl ChatMessage {
    /// Create a plain text message from a user.
    pub fn text(
        stream_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            text: text.into(),
            content_kind: ContentKind::Text,
            timestamp: Utc::now(),
            interest: 0.0,
            is_mentioned: false,
            from_self: false,
            is_command: false,
            probability_gain: None,
        }
    }

    pub fn with_interest(mut self, interest: f64) -> Self {
        self.interest = interest;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn mentioned(mut self) -> Self {
        self.is_mentioned = true;
        self
    }

    /// Image and sticker-only messages never earn a reply in idle mode.
    pub fn is_media_only(&self) -> bool {
        matches!(self.content_kind, ContentKind::Image | ContentKind::Sticker)
    }

    /// `name:text` rendering used as the reply target description.
    pub fn reply_to_label(&self) -> String {
        let name = self.sender_name.as_deref().unwrap_or(&self.sender_id);
        format!("{name}:{}", self.text)
    }
}

/// What started a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// A real message read from the store
    Message(ChatMessage),

    /// Synthetic trigger injected after a stretch of silence
    Proactive {
        /// How long the conversation has been silent
        silence: Duration,
        /// Prompt describing the silence to the generator
        prompt: String,
        /// Unique id, so proactive cycles can be correlated like messages
        id: String,
    },
}

impl Trigger {
    pub fn proactive(silence: Duration, prompt: impl Into<String>) -> Self {
        Trigger::Proactive {
            silence,
            prompt: prompt.into(),
            id: format!("proactive_{}", Uuid::new_v4()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Trigger::Message(m) => &m.id,
            Trigger::Proactive { id, .. } => id,
        }
    }

    pub fn is_proactive(&self) -> bool {
        matches!(self, Trigger::Proactive { .. })
    }

    pub fn is_mentioned(&self) -> bool {
        matches!(self, Trigger::Message(m) if m.is_mentioned)
    }

    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            Trigger::Message(m) => Some(m),
            Trigger::Proactive { .. } => None,
        }
    }
}
