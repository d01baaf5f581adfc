//! Errors surfaced by the orchestrator's public operations.

use squadron_core::RuntimeState;

use crate::agent::SlotError;
use crate::session::SessionHostError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Setup failed for agent '{agent}': {source}")]
    Setup {
        agent: String,
        #[source]
        source: SlotError,
    },

    #[error("No agent matches task: {description}")]
    NoMatchingAgent { description: String },

    #[error("Unknown agent: {name}")]
    UnknownAgent { name: String },

    #[error("Agent already registered: {name}")]
    DuplicateAgent { name: String },

    #[error("Invalid agent descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("Task already pending: {id}")]
    DuplicateTask { id: String },

    #[error("Runtime is {state}, not accepting tasks")]
    NotAcceptingTasks { state: RuntimeState },

    #[error("Runtime already initialized (state: {state})")]
    AlreadyInitialized { state: RuntimeState },

    #[error("Agents can only be registered before initialization (state: {state})")]
    RegistrationClosed { state: RuntimeState },

    #[error("Session host error: {0}")]
    SessionHost(#[from] SessionHostError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
