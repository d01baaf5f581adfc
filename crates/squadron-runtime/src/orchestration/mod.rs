//! Task orchestration: selection, queueing, admission and supervised execution.
//!
//! - [`AgentRegistry`]: descriptor registry and capability-based selection.
//! - [`TaskQueue`]: priority queue of accepted tasks, FIFO within a priority.
//! - [`ConcurrencyLimiter`]: semaphore-based cap on concurrently executing attempts.
//! - [`ExecutionSupervisor`]: per-agent attempt loop with timeout, retry and backoff.
//! - [`Orchestrator`]: the runtime tying the above together.

pub mod limiter;
pub mod orchestrator;
pub mod queue;
pub mod selector;
pub mod supervisor;

pub use limiter::{ConcurrencyLimiter, LimiterError, LimiterPermit};
pub use orchestrator::{CleanupFailure, JobTicket, Orchestrator, ShutdownReport};
pub use queue::TaskQueue;
pub use selector::AgentRegistry;
pub use supervisor::{ExecutionError, ExecutionSupervisor, RetryPolicy, ShutdownSignals};
