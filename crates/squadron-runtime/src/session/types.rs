//! Session host contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use squadron_core::{ExecutionPlan, PaneStatus, TaskId};

/// Reference to a provisioned session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_name: String,
    pub task_id: TaskId,
    pub panes: usize,
}

impl SessionHandle {
    pub fn for_plan(plan: &ExecutionPlan) -> Self {
        Self {
            session_name: plan.session_name.clone(),
            task_id: plan.task_id.clone(),
            panes: plan.pane_count(),
        }
    }
}

/// External environment that runs one agent per pane of a session.
///
/// Provisioning is never retried by the runtime; `teardown` is always
/// called once provisioning succeeded, whatever the outcome.
#[async_trait]
pub trait SessionHost: Send + Sync {
    async fn provision(&self, plan: &ExecutionPlan) -> Result<SessionHandle, SessionHostError>;

    /// Current status of every pane, indexed like `plan.panes`.
    async fn poll_status(&self, handle: &SessionHandle)
    -> Result<Vec<PaneStatus>, SessionHostError>;

    async fn teardown(&self, handle: &SessionHandle) -> Result<(), SessionHostError>;
}

/// Errors from a session host.
#[derive(Debug, thiserror::Error)]
pub enum SessionHostError {
    #[error("Failed to provision session {session}: {reason}")]
    Provision { session: String, reason: String },

    #[error("Failed to poll session {session}: {reason}")]
    Poll { session: String, reason: String },

    #[error("Failed to tear down session {session}: {reason}")]
    Teardown { session: String, reason: String },

    #[error("Unknown session: {session}")]
    UnknownSession { session: String },
}
