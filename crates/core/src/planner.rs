//! Planner trait: picks the next action for a cycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{ActionSet, PlannedAction};
use crate::cycle::ChatMode;
use crate::error::PlanError;
use crate::message::{ChatMessage, StreamInfo};

/// What the planner decided, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub action: PlannedAction,

    #[serde(default)]
    pub reasoning: String,

    /// Run the action concurrently with sending the pre-generated reply
    #[serde(default)]
    pub is_parallel: bool,

    /// Message the action responds to, if the planner chose one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ChatMessage>,
}

impl PlanResult {
    pub fn new(action: PlannedAction, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            reasoning: reasoning.into(),
            is_parallel: false,
            target: None,
        }
    }

    /// A reply decision made without consulting the planner.
    pub fn forced_reply(reasoning: impl Into<String>) -> Self {
        Self::new(PlannedAction::Reply, reasoning)
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn with_target(mut self, target: ChatMessage) -> Self {
        self.target = Some(target);
        self
    }
}

/// Chooses one action from the set available this cycle.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        stream: &StreamInfo,
        mode: ChatMode,
        actions: &ActionSet,
    ) -> std::result::Result<PlanResult, PlanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_reply_is_not_parallel() {
        let plan = PlanResult::forced_reply("nothing else to choose");
        assert_eq!(plan.action, PlannedAction::Reply);
        assert!(!plan.is_parallel);
        assert!(plan.target.is_none());
    }

    #[test]
    fn plan_result_roundtrips_through_json() {
        let plan = PlanResult::new(
            PlannedAction::Custom {
                name: "emoji".into(),
                payload: serde_json::json!({"mood": "happy"}),
            },
            "lighten the mood",
        )
        .parallel();
        let json = serde_json::to_string(&plan).unwrap();
        let back: PlanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn targeted_plans_compare_by_target() {
        let lunch = ChatMessage::text("s1", "alice", "lunch?");
        let dinner = ChatMessage::text("s1", "bob", "dinner?");
        let plan = PlanResult::forced_reply("answer").with_target(lunch.clone());

        assert_eq!(plan.clone(), PlanResult::forced_reply("answer").with_target(lunch));
        assert_ne!(plan, PlanResult::forced_reply("answer").with_target(dinner));
        assert_ne!(plan, PlanResult::forced_reply("answer"));
    }
}
