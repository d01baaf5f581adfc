//! Drives one plan through a session host: provision, poll, fold, teardown.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use squadron_core::{ExecutionPlan, JobResult};

use super::folder::PaneStatusFolder;
use super::types::{SessionHost, SessionHostError};

/// Run `plan` on `host` until every pane settles or `timeout` elapses.
///
/// Panes still pending at the timeout fail as timeouts. Teardown runs
/// whenever provisioning succeeded; a teardown failure is logged, not
/// surfaced, so it never hides the job result.
pub async fn run_session(
    host: &dyn SessionHost,
    plan: &ExecutionPlan,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<JobResult, SessionHostError> {
    let handle = host.provision(plan).await?;
    info!(
        session = %handle.session_name,
        task_id = %plan.task_id,
        panes = handle.panes,
        "Session provisioned"
    );

    let mut folder = PaneStatusFolder::new(plan);
    let deadline = Instant::now() + timeout;
    let polled = loop {
        match host.poll_status(&handle).await {
            Ok(statuses) => folder.record_all(statuses),
            Err(e) => break Err(e),
        }
        if folder.is_complete() {
            break Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(
                session = %handle.session_name,
                pending = folder.pending(),
                "Session timed out"
            );
            folder.expire(timeout);
            break Ok(());
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    };

    if let Err(e) = host.teardown(&handle).await {
        warn!(session = %handle.session_name, error = %e, "Session teardown failed");
    }
    polled?;

    let result = folder.finish();
    info!(
        session = %handle.session_name,
        success = result.success,
        partial = result.partial,
        "Session finished"
    );
    Ok(result)
}
