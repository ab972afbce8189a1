//! Ensemble – agent execution and event-routing core
//!
//! This crate implements the runtime core of a role-based multi-agent platform:
//! - Agents move through a small lifecycle state machine and drive a chain of
//!   action steps on a shared worker pool
//! - Roles live in a per-agent registry whose mutations emit lifecycle events
//! - A static binding table routes typed events to handlers
//! - ACL messages are decoded from wire text and surfaced as events

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core modules: agents, roles, events, messages and scheduling
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{Agent, AgentConfig, AgentState};

/// Current version of the Ensemble runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
