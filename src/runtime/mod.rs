//! Runtime core and configuration
//!
//! This module wires the agent core together: lifecycle and step chain
//! (`agent`, `scheduler`), role and goal state (`role`, `goal`), event routing
//! (`event`, `bus`), and the ACL wire codec with its transport seam
//! (`message`, `transport`).

use serde::{Deserialize, Serialize};
use std::path::Path;

// Submodules
pub mod agent;
pub mod bus;
pub mod error;
pub mod event;
pub mod goal;
pub mod ids;
pub mod message;
pub mod role;
pub mod scheduler;
pub mod transport;

use error::ConfigError;
use scheduler::FaultPolicy;

/// Configuration for one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// ACL name; used as sender of outbound messages that leave it empty
    pub name: String,

    /// Maximum number of events a single execute step dispatches
    pub max_events_per_step: usize,

    /// What the step chain does after a step fault
    pub fault_policy: FaultPolicy,

    /// Consecutive faults tolerated under `FaultPolicy::Restart`
    pub max_consecutive_faults: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            max_events_per_step: 64,
            fault_policy: FaultPolicy::Halt,
            max_consecutive_faults: 3,
        }
    }
}

impl AgentConfig {
    /// Create a default configuration with the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file; absent keys take defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = serde_json::from_slice(&data)?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// Re-export commonly used types
pub use agent::{Agent, AgentBuilder, AgentState, StepBehaviour};
pub use bus::{EventBinding, EventBus};
pub use event::{Event, EventPayload, EventType};
pub use message::{AclMessage, Performative};
pub use role::{Role, RoleRef, RoleRegistry};
pub use scheduler::{ManualPool, WorkerPool};
