//! Message store trait: read access to persisted chat history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::ChatMessage;

/// Which end of the window to keep when more messages match than `limit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Keep the newest `limit` messages
    #[default]
    Latest,
    /// Keep the oldest `limit` messages
    Earliest,
}

/// Filters applied by [`MessageStore::fetch_since`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFilter {
    /// Drop messages the bot sent itself
    pub exclude_self: bool,
    /// Drop bot commands
    pub exclude_commands: bool,
    pub limit_mode: LimitMode,
}

impl Default for FetchFilter {
    fn default() -> Self {
        Self {
            exclude_self: true,
            exclude_commands: true,
            limit_mode: LimitMode::Latest,
        }
    }
}

impl FetchFilter {
    pub fn accepts(&self, message: &ChatMessage) -> bool {
        !(self.exclude_self && message.from_self) && !(self.exclude_commands && message.is_command)
    }
}

/// Read side of message persistence.
///
/// Results are always in chronological order, oldest first, regardless of
/// [`LimitMode`]. Only messages strictly newer than `since` are returned.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch_since(
        &self,
        stream_id: &str,
        since: DateTime<Utc>,
        limit: usize,
        filter: &FetchFilter,
    ) -> std::result::Result<Vec<ChatMessage>, StoreError>;

    /// Count of messages strictly newer than `since`, before any filtering.
    async fn count_since(
        &self,
        stream_id: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<usize, StoreError>;
}
