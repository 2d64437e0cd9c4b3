//! Message store implementations for chatloop.
//!
//! The engine only reads through [`chatloop_core::MessageStore`]; this crate
//! provides an in-memory backend for the CLI simulator and for tests.

pub mod in_memory;

pub use in_memory::InMemoryMessageStore;
