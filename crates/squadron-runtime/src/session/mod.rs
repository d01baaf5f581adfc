//! External session hosting.
//!
//! Instead of running agents in-process, a plan can be handed to a
//! [`SessionHost`] that runs one agent per pane and reports pane statuses,
//! which are folded into the same [`squadron_core::JobResult`] shape.

mod folder;
mod process;
mod runner;
mod types;

pub use folder::PaneStatusFolder;
pub use process::ProcessSessionHost;
pub use runner::run_session;
pub use types::{SessionHandle, SessionHost, SessionHostError};
