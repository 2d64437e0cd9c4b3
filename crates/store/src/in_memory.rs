//! In-memory backend: useful for testing and simulated conversations.

use async_trait::async_trait;
use chatloop_core::error::StoreError;
use chatloop_core::message::ChatMessage;
use chatloop_core::store::{FetchFilter, LimitMode, MessageStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory store keeping each stream's messages in timestamp order.
///
/// Cloning shares the underlying storage, so a writer (the CLI reading stdin,
/// a test) and the engine can hold the same store.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    streams: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its stream, keeping timestamp order.
    pub async fn push(&self, message: ChatMessage) {
        let mut streams = self.streams.write().await;
        let messages = streams.entry(message.stream_id.clone()).or_default();
        let pos = messages.partition_point(|m| m.timestamp <= message.timestamp);
        tracing::trace!(stream = %message.stream_id, id = %message.id, "Stored message");
        messages.insert(pos, message);
    }

    /// All messages of a stream, oldest first.
    pub async fn messages(&self, stream_id: &str) -> Vec<ChatMessage> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self, stream_id: &str) -> usize {
        self.streams
            .read()
            .await
            .get(stream_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn fetch_since(
        &self,
        stream_id: &str,
        since: DateTime<Utc>,
        limit: usize,
        filter: &FetchFilter,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let streams = self.streams.read().await;
        let Some(messages) = streams.get(stream_id) else {
            return Ok(Vec::new());
        };

        let matching: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.timestamp > since && filter.accepts(m))
            .collect();

        let window = match filter.limit_mode {
            LimitMode::Latest => &matching[matching.len().saturating_sub(limit)..],
            LimitMode::Earliest => &matching[..limit.min(matching.len())],
        };

        Ok(window.iter().map(|m| (*m).clone()).collect())
    }

    async fn count_since(&self, stream_id: &str, since: DateTime<Utc>) -> Result<usize, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream_id)
            .map(|messages| messages.iter().filter(|m| m.timestamp > since).count())
            .unwrap_or(0))
    }
}
