//! Error types for the chat-cycle domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error variant.

use thiserror::Error;

/// The top-level error type for all chat-cycle operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Message store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Planner errors ---
    #[error("Planner error: {0}")]
    Plan(#[from] PlanError),

    // --- Reply generation errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Transport errors ---
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    // --- Action errors ---
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("Planner returned no usable action: {0}")]
    Empty(String),

    #[error("Planner request failed: {0}")]
    RequestFailed(String),

    #[error("Planner vetoed by event hook: {0}")]
    Vetoed(String),
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Model returned an empty reply")]
    EmptyReply,

    #[error("Generation request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("Delivery failed to {stream}: {reason}")]
    DeliveryFailed { stream: String, reason: String },

    #[error("Transport not connected: {0}")]
    NotConnected(String),
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Action not found: {0}")]
    NotFound(String),

    #[error("Action execution failed: {action}: {reason}")]
    ExecutionFailed { action: String, reason: String },

    #[error("Action timed out: {action} after {timeout_secs}s")]
    Timeout { action: String, timeout_secs: u64 },

    #[error("Action refresh failed: {0}")]
    RefreshFailed(String),
}

impl ActionError {
    /// Whether this failure is a bounded-wait timeout rather than a fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_correctly() {
        let err = Error::Store(StoreError::QueryFailed("disk full".into()));
        assert!(err.to_string().contains("Store error"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn action_error_displays_correctly() {
        let err = Error::Action(ActionError::ExecutionFailed {
            action: "poke".into(),
            reason: "target left the group".into(),
        });
        assert!(err.to_string().contains("poke"));
        assert!(err.to_string().contains("left the group"));
    }

    #[test]
    fn timeout_is_classified() {
        let timeout = ActionError::Timeout {
            action: "reply".into(),
            timeout_secs: 40,
        };
        assert!(timeout.is_timeout());
        assert!(!ActionError::NotFound("x".into()).is_timeout());
    }
}
