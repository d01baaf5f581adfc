//! Squadron Runtime Library
//!
//! Core functionality for the Squadron agent runtime:
//! - Agent contract and per-agent lifecycle slots
//! - Capability-based agent selection
//! - Priority queueing and global concurrency limiting
//! - Supervised execution with timeouts, retries and backoff
//! - Optional external session hosting (one pane per agent)

pub mod agent;
pub mod error;
pub mod orchestration;
pub mod session;
pub mod task;

pub use agent::{Agent, AgentError, BoxedAgent, CommandAgent, EchoAgent};
pub use error::{OrchestratorError, Result};
pub use orchestration::{JobTicket, Orchestrator, ShutdownReport};
pub use task::{SubmitOptions, Task, TaskTarget};
