//! Folds per-pane status reports into a [`JobResult`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use squadron_core::job::unix_millis;
use squadron_core::{
    AgentOutcome, AttemptOutcome, ExecutionAttempt, ExecutionPlan, FailureKind, JobResult,
    PaneStatus, TaskId,
};

use crate::agent::command::parse_output;

struct PaneRecord {
    agent_name: String,
    status: PaneStatus,
    timed_out: bool,
    finished: Option<(Instant, u64)>,
}

/// Collects pane statuses for one session.
///
/// The first terminal status reported for a pane wins; later reports for the
/// same pane are ignored.
pub struct PaneStatusFolder {
    task_id: TaskId,
    started: Instant,
    started_at_ms: u64,
    panes: Vec<PaneRecord>,
}

impl PaneStatusFolder {
    pub fn new(plan: &ExecutionPlan) -> Self {
        Self {
            task_id: plan.task_id.clone(),
            started: Instant::now(),
            started_at_ms: unix_millis(),
            panes: plan
                .panes
                .iter()
                .map(|p| PaneRecord {
                    agent_name: p.agent_name.clone(),
                    status: PaneStatus::Pending,
                    timed_out: false,
                    finished: None,
                })
                .collect(),
        }
    }

    /// Record one report. Returns `true` if it settled the pane.
    pub fn record(&mut self, pane: usize, status: PaneStatus) -> bool {
        let Some(record) = self.panes.get_mut(pane) else {
            debug!(pane, "Status for unknown pane ignored");
            return false;
        };
        if record.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        record.status = status;
        record.finished = Some((Instant::now(), unix_millis()));
        true
    }

    /// Record a full poll result, indexed by pane.
    pub fn record_all(&mut self, statuses: Vec<PaneStatus>) {
        for (pane, status) in statuses.into_iter().enumerate() {
            self.record(pane, status);
        }
    }

    pub fn pending(&self) -> usize {
        self.panes
            .iter()
            .filter(|p| !p.status.is_terminal())
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Fail every pane still pending as timed out.
    pub fn expire(&mut self, after: Duration) {
        let now = (Instant::now(), unix_millis());
        for record in self.panes.iter_mut().filter(|p| !p.status.is_terminal()) {
            record.status = PaneStatus::Failed {
                exit_code: None,
                message: format!("Session timed out after {}s", after.as_secs()),
            };
            record.timed_out = true;
            record.finished = Some(now);
        }
    }

    pub fn finish(self) -> JobResult {
        let started = self.started;
        let started_at_ms = self.started_at_ms;
        let per_agent = self
            .panes
            .into_iter()
            .map(|record| {
                let (finished_at, ended_at_ms) =
                    record.finished.unwrap_or_else(|| (Instant::now(), unix_millis()));
                let outcome = match record.status {
                    PaneStatus::Succeeded { output } => AttemptOutcome::Success {
                        result: parse_output(&output),
                    },
                    PaneStatus::Failed { exit_code, message } => AttemptOutcome::Failure {
                        kind: if record.timed_out {
                            FailureKind::Timeout
                        } else {
                            FailureKind::Failed
                        },
                        message: match exit_code {
                            Some(code) => format!("exit code {code}: {message}"),
                            None => message,
                        },
                    },
                    PaneStatus::Pending => AttemptOutcome::Failure {
                        kind: FailureKind::Aborted,
                        message: "Pane never reported a result".to_string(),
                    },
                };
                let attempt = ExecutionAttempt {
                    attempt: 0,
                    started_at_ms,
                    ended_at_ms,
                    backoff_ms: 0,
                    outcome,
                };
                AgentOutcome::from_history(
                    record.agent_name,
                    vec![attempt],
                    finished_at.saturating_duration_since(started),
                    (FailureKind::Aborted, String::new()),
                )
            })
            .collect();
        JobResult::from_outcomes(self.task_id, per_agent, started.elapsed())
    }
}
