//! Squadron Core Library
//!
//! Shared functionality for Squadron components:
//! - Serializable data model (descriptors, tasks, attempts, job results)
//! - Status snapshots and session execution plans
//! - Configuration resolution and hierarchy
//! - Registry file loading
//! - Common error types

pub mod config;
pub mod descriptor;
pub mod error;
pub mod job;
pub mod plan;
pub mod status;
pub mod task;
pub mod tracing_init;

pub use config::Config;
pub use descriptor::{AgentDescriptor, AgentPolicy, RegistryEntry};
pub use error::{Error, Result};
pub use job::{AgentOutcome, AttemptOutcome, ExecutionAttempt, FailureKind, JobResult};
pub use plan::{ExecutionPlan, PanePlan, PaneStatus};
pub use status::{AgentState, AgentStatus, RuntimeState, SystemStatus};
pub use task::{Priority, TaskId};
