//! # Chatloop Core
//!
//! Domain types, collaborator traits, and error definitions for the chatloop
//! conversation engine. This crate has **no engine logic**. It defines the
//! domain model that the engine drives and that integrations implement.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (message store, planner, reply generator,
//! sender, action executor, willingness tracker) is a trait here. This enables:
//! - Plugging the engine into any chat platform or model backend
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod action;
pub mod cycle;
pub mod error;
pub mod event;
pub mod hooks;
pub mod message;
pub mod planner;
pub mod reply;
pub mod store;
pub mod willingness;

// Re-export key types at crate root for ergonomics
pub use action::{
    ActionContext, ActionExecutor, ActionModifier, ActionOutcome, ActionSet, ActionSpec,
    PlannedAction, StaticActions,
};
pub use cycle::{
    ActionRecord, ChatMode, CycleRecord, CycleSnapshot, CycleState, EnergyBounds, OpenCycle,
};
pub use error::{
    ActionError, Error, GenerationError, PlanError, Result, SendError, StoreError,
};
pub use event::{DomainEvent, EventBus};
pub use hooks::{NoopHooks, SleepMonitor, SocialHooks};
pub use message::{ChatKind, ChatMessage, ContentKind, StreamInfo, Trigger};
pub use planner::{PlanResult, Planner};
pub use reply::{ReplyGenerator, ReplySegment, ReplySender, SendOptions, joined_text};
pub use store::{FetchFilter, LimitMode, MessageStore};
pub use willingness::{AlwaysWilling, Willingness};
