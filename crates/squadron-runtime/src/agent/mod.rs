//! Agent behavior contract and the per-instance lifecycle slot.
//!
//! - [`Agent`]: the async capability every agent implements.
//! - [`AgentSlot`]: owns one agent instance and enforces its lifecycle
//!   (`Uninitialized -> Ready <-> Executing -> ShuttingDown -> Terminated`).
//! - [`CommandAgent`] / [`EchoAgent`]: built-in agents used by the binary.

pub mod builtin;
pub mod command;
pub mod slot;

use async_trait::async_trait;
use serde_json::Value;

use squadron_core::{AgentDescriptor, RegistryEntry};

use crate::task::Task;

pub use builtin::EchoAgent;
pub use command::CommandAgent;
pub use slot::{AgentSlot, ExecutionGuard, SlotError};

/// Behavior of one agent instance.
///
/// The runtime guarantees `process` is never called concurrently on the same
/// instance, and never before `setup` has succeeded.
#[async_trait]
pub trait Agent: Send {
    /// One-time initialization. Runs at most once successfully.
    async fn setup(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Handle one task and produce its result.
    async fn process(&mut self, task: &Task) -> Result<Value, AgentError>;

    /// Release resources. Called once during shutdown.
    async fn cleanup(&mut self) -> Result<(), AgentError> {
        Ok(())
    }
}

pub type BoxedAgent = Box<dyn Agent>;

/// Instantiate registry entries: a [`CommandAgent`] when the entry names a
/// command, an [`EchoAgent`] otherwise.
pub fn from_registry(
    entries: Vec<RegistryEntry>,
) -> Result<Vec<(AgentDescriptor, BoxedAgent)>, AgentError> {
    entries
        .into_iter()
        .map(|entry| {
            let name = entry.descriptor.name.clone();
            let agent: BoxedAgent = match &entry.command {
                Some(argv) => Box::new(CommandAgent::new(name, argv)?),
                None => Box::new(EchoAgent::new(name)),
            };
            Ok((entry.descriptor, agent))
        })
        .collect()
}

/// Errors raised by agent implementations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{0}")]
    Message(String),

    #[error("Command exited with code {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}
