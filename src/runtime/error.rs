//! Error types for the Ensemble runtime
//!
//! Domain errors use thiserror; user-supplied code (roles, handlers,
//! behaviours, transports) reports through `anyhow` and is converted to a
//! domain error at the boundary where the runtime catches it.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::agent::AgentState;
use super::ids::GoalId;
use super::scheduler::Step;

/// Failure to turn wire text into a message
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Text is not a structured record
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is absent or empty
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// Performative tag is not a known speech act
    #[error("unknown performative '{0}'")]
    UnknownPerformative(String),
}

/// Convenience result alias for codec operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Agent lifecycle errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Requested transition is not valid from the current state
    #[error("cannot {operation} agent in state {state:?}")]
    InvalidTransition {
        /// Operation that was attempted
        operation: &'static str,
        /// State the agent was in
        state: AgentState,
    },

    /// Role activation failed while starting
    #[error("role activation failed: {0}")]
    Activation(String),

    /// Outbound message could not be handed to the transport
    #[error("send failed: {0}")]
    Send(String),

    /// Inbound text could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Convenience result alias for agent operations
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Fault raised inside a step's work
#[derive(Debug, Error)]
pub enum StepError {
    /// Step work returned an error
    #[error("{step:?} step failed: {detail}")]
    Failed {
        /// Step that failed
        step: Step,
        /// Error details
        detail: String,
    },

    /// Step work panicked
    #[error("{step:?} step panicked: {detail}")]
    Panicked {
        /// Step that panicked
        step: Step,
        /// Panic message, if it was a string
        detail: String,
    },
}

impl StepError {
    /// Error or panic message without the step prefix
    pub fn detail(&self) -> &str {
        match self {
            StepError::Failed { detail, .. } | StepError::Panicked { detail, .. } => detail,
        }
    }
}

/// Convenience result alias for step execution
pub type StepResult<T> = std::result::Result<T, StepError>;

/// Goal base errors
#[derive(Debug, Error)]
pub enum GoalError {
    /// Goal is not held by the goal base
    #[error("Goal {0} not found")]
    UnknownGoal(GoalId),
}

/// Convenience result alias for goal operations
pub type GoalResult<T> = std::result::Result<T, GoalError>;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Config file {path}: {source}")]
    Io {
        /// Path of the config file
        path: PathBuf,
        /// Underlying IO error
        source: io::Error,
    },

    /// Config file is not valid JSON for `AgentConfig`
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Render a caught panic payload as text.
pub(crate) fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
