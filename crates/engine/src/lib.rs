//! # Chatloop Engine
//!
//! Runs one cooperative control loop per conversation:
//!
//! - [`EnergyModel`] keeps the idle / engaged energy scalar and its thresholds
//! - [`WillingnessGate`] decides, in idle mode, whether one message earns a reply
//! - [`PlanActPipeline`] runs plan → generate → act for a single cycle
//! - [`ResponseSender`] applies the quoting and silence policy when sending
//! - the proactive scheduler speaks first after a randomized stretch of silence
//! - [`CycleDriver`] ties these together tick by tick
//! - [`ChatRegistry`] creates, supervises and destroys loops per stream

pub mod context;
pub mod driver;
pub mod energy;
pub mod gate;
pub mod pipeline;
pub mod proactive;
pub mod registry;
pub mod response;
pub mod supervisor;

#[cfg(test)]
mod test_helpers;

pub use context::{Collaborators, LoopContext};
pub use driver::{CycleDriver, ProactiveInbox, TickOutcome};
pub use energy::{EnergyLog, EnergyModel, ModeChange};
pub use gate::{GateDecision, WillingnessGate};
pub use pipeline::PlanActPipeline;
pub use proactive::{compute_interval, format_duration, three_sigma_range};
pub use registry::{ChatHandle, ChatRegistry};
pub use response::{Delivery, ResponseSender};
pub use supervisor::{TaskKind, supervise};
