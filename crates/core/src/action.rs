//! Actions: what a cycle may do besides replying.
//!
//! The set of actions available in a cycle is recomputed every cycle by an
//! external [`ActionModifier`] (plugins may come and go). The planner picks one
//! [`PlannedAction`]; anything that isn't a reply is run through an
//! [`ActionExecutor`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cycle::ChatMode;
use crate::error::ActionError;
use crate::message::{ChatMessage, StreamInfo};

pub const REPLY: &str = "reply";
pub const NO_REPLY: &str = "no_reply";
pub const NO_ACTION: &str = "no_action";
pub const PROACTIVE_REPLY: &str = "proactive_reply";

/// Description of one action offered to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Whether this action may run alongside a reply
    #[serde(default)]
    pub parallel: bool,

    /// Parameter schema offered to the planner
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parallel: false,
            parameters: serde_json::Value::Null,
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

/// The actions available to one cycle, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSet {
    actions: BTreeMap<String, ActionSpec>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline set every conversation starts from.
    pub fn core() -> Self {
        let mut set = Self::new();
        set.insert(ActionSpec::new(REPLY, "Reply to the conversation"));
        set.insert(ActionSpec::new(NO_REPLY, "Stay silent this turn"));
        set.insert(ActionSpec::new(NO_ACTION, "Do nothing"));
        set
    }

    /// Add an action. Replaces any existing action with the same name.
    pub fn insert(&mut self, spec: ActionSpec) {
        self.actions.insert(spec.name.clone(), spec);
    }

    pub fn with(mut self, spec: ActionSpec) -> Self {
        self.insert(spec);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<ActionSpec> {
        self.actions.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether anything beyond reply / no_reply / no_action is on offer.
    pub fn has_non_reply_actions(&self) -> bool {
        self.actions
            .keys()
            .any(|name| !matches!(name.as_str(), REPLY | NO_REPLY | NO_ACTION))
    }
}

/// The action chosen by the planner, with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum PlannedAction {
    Reply,
    NoReply,
    NoAction,
    ProactiveReply {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Plugin-provided action with an opaque payload
    Custom {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl PlannedAction {
    pub fn name(&self) -> &str {
        match self {
            PlannedAction::Reply => REPLY,
            PlannedAction::NoReply => NO_REPLY,
            PlannedAction::NoAction => NO_ACTION,
            PlannedAction::ProactiveReply { .. } => PROACTIVE_REPLY,
            PlannedAction::Custom { name, .. } => name,
        }
    }

    /// Whether this action is satisfied by generating and sending a reply.
    pub fn is_reply(&self) -> bool {
        matches!(self, PlannedAction::Reply | PlannedAction::ProactiveReply { .. })
    }

    /// Build an action from its wire name, mapping core names onto their variants.
    pub fn from_name(name: &str, payload: serde_json::Value) -> Self {
        match name {
            REPLY => PlannedAction::Reply,
            NO_REPLY => PlannedAction::NoReply,
            NO_ACTION => PlannedAction::NoAction,
            PROACTIVE_REPLY => PlannedAction::ProactiveReply {
                topic: payload
                    .get("topic")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
            },
            other => PlannedAction::Custom {
                name: other.to_string(),
                payload,
            },
        }
    }
}

/// Result of executing a non-reply action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,

    /// Text the action itself sent, if any
    #[serde(default)]
    pub reply_text: String,

    /// Command the action issued, if any
    #[serde(default)]
    pub command: String,
}

impl ActionOutcome {
    pub fn succeeded(reply_text: impl Into<String>) -> Self {
        Self {
            success: true,
            reply_text: reply_text.into(),
            command: String::new(),
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

/// Everything an executor needs to know about the cycle that invoked it.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub stream: StreamInfo,
    pub cycle_id: u64,
    pub thinking_id: String,
    pub reasoning: String,
    /// Message the action is aimed at, if any
    pub target: Option<ChatMessage>,
}

/// Recomputes which actions are available for a stream in a given mode.
#[async_trait]
pub trait ActionModifier: Send + Sync {
    async fn refresh(&self, stream: &StreamInfo, mode: ChatMode)
    -> std::result::Result<ActionSet, ActionError>;
}

/// Runs a planned non-reply action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &PlannedAction,
        context: &ActionContext,
    ) -> std::result::Result<ActionOutcome, ActionError>;
}

/// An [`ActionModifier`] that always offers the same set.
pub struct StaticActions(pub ActionSet);

#[async_trait]
impl ActionModifier for StaticActions {
    async fn refresh(
        &self,
        _stream: &StreamInfo,
        _mode: ChatMode,
    ) -> std::result::Result<ActionSet, ActionError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_set_has_no_extra_actions() {
        let set = ActionSet::core();
        assert_eq!(set.len(), 3);
        assert!(!set.has_non_reply_actions());
    }

    #[test]
    fn plugin_action_counts_as_extra() {
        let set = ActionSet::core().with(ActionSpec::new("emoji", "Send a sticker").parallel());
        assert!(set.has_non_reply_actions());
        assert!(set.get("emoji").unwrap().parallel);
    }

    #[test]
    fn remove_no_reply() {
        let mut set = ActionSet::core();
        assert!(set.remove(NO_REPLY).is_some());
        assert!(!set.contains(NO_REPLY));
        assert!(set.contains(REPLY));
    }

    #[test]
    fn planned_action_names() {
        assert_eq!(PlannedAction::Reply.name(), "reply");
        assert_eq!(PlannedAction::ProactiveReply { topic: None }.name(), "proactive_reply");
        let custom = PlannedAction::from_name("poke", serde_json::json!({"user": "42"}));
        assert_eq!(custom.name(), "poke");
        assert!(!custom.is_reply());
    }

    #[test]
    fn proactive_reply_topic_is_typed() {
        let action = PlannedAction::from_name(PROACTIVE_REPLY, serde_json::json!({"topic": "weekend"}));
        assert_eq!(
            action,
            PlannedAction::ProactiveReply {
                topic: Some("weekend".into())
            }
        );
        assert!(action.is_reply());
    }

    #[test]
    fn planned_action_serialization() {
        let json = serde_json::to_string(&PlannedAction::Custom {
            name: "music".into(),
            payload: serde_json::json!({"song": "x"}),
        })
        .unwrap();
        assert!(json.contains("\"action_type\":\"custom\""));
        assert!(json.contains("music"));
    }

    #[tokio::test]
    async fn static_actions_return_their_set() {
        let modifier = StaticActions(ActionSet::core());
        let info = StreamInfo::private("s", "1");
        let set = modifier.refresh(&info, ChatMode::Idle).await.unwrap();
        assert_eq!(set, ActionSet::core());
    }
}
