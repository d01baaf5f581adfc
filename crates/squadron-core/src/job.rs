//! Execution attempt records and aggregate job results.
//!
//! These are the wire shapes handed back to callers; all of them serialize
//! with camelCase field names.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskId;

/// Current time as milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Saturating conversion of a duration to whole milliseconds.
pub fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `process` did not finish before its deadline.
    Timeout,
    /// `process` returned an error.
    Failed,
    /// The agent's `setup` failed.
    Setup,
    /// The attempt was cut short by runtime shutdown.
    Aborted,
    /// The agent instance was not in a state that accepts work.
    NotReady,
}

impl FailureKind {
    /// Whether the supervisor may retry after this failure.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Failed)
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { result: Value },
    Failure { kind: FailureKind, message: String },
}

impl AttemptOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One try of (task, agent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAttempt {
    /// Zero-based attempt number.
    pub attempt: u32,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    /// Backoff slept before this attempt started (0 for the first).
    pub backoff_ms: u64,
    pub outcome: AttemptOutcome,
}

/// Terminal result for one agent within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub agent_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Number of attempts made.
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ExecutionAttempt>,
}

impl AgentOutcome {
    /// Build the terminal outcome from an attempt history.
    ///
    /// The last attempt decides success; an empty history is a failure with
    /// the given fallback classification.
    pub fn from_history(
        agent_name: impl Into<String>,
        history: Vec<ExecutionAttempt>,
        elapsed: Duration,
        fallback: (FailureKind, String),
    ) -> Self {
        let (success, result, error, failure_kind) = match history.last().map(|a| &a.outcome) {
            Some(AttemptOutcome::Success { result }) => (true, Some(result.clone()), None, None),
            Some(AttemptOutcome::Failure { kind, message }) => {
                (false, None, Some(message.clone()), Some(*kind))
            }
            None => (false, None, Some(fallback.1), Some(fallback.0)),
        };
        Self {
            agent_name: agent_name.into(),
            success,
            result,
            error,
            failure_kind,
            attempts: u32::try_from(history.len()).unwrap_or(u32::MAX),
            elapsed_ms: duration_millis(elapsed),
            history,
        }
    }

    /// A failure recorded without any attempt (e.g. the runtime stopped first).
    pub fn failed_without_attempt(
        agent_name: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::from_history(agent_name, Vec::new(), elapsed, (kind, message.into()))
    }
}

/// Aggregate outcome of one task's fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub task_id: TaskId,
    /// `true` unless every selected agent failed.
    pub success: bool,
    /// `true` when some but not all agents succeeded.
    pub partial: bool,
    pub per_agent: Vec<AgentOutcome>,
    pub total_elapsed_ms: u64,
    /// Attempts beyond the first, summed over agents.
    pub retry_count: u32,
}

impl JobResult {
    pub fn from_outcomes(task_id: TaskId, per_agent: Vec<AgentOutcome>, elapsed: Duration) -> Self {
        let succeeded = per_agent.iter().filter(|o| o.success).count();
        let retry_count = per_agent
            .iter()
            .map(|o| o.attempts.saturating_sub(1))
            .sum();
        Self {
            task_id,
            success: succeeded > 0,
            partial: succeeded > 0 && succeeded < per_agent.len(),
            per_agent,
            total_elapsed_ms: duration_millis(elapsed),
            retry_count,
        }
    }

    pub fn outcome(&self, agent_name: &str) -> Option<&AgentOutcome> {
        self.per_agent.iter().find(|o| o.agent_name == agent_name)
    }

    pub fn failed_agents(&self) -> impl Iterator<Item = &AgentOutcome> {
        self.per_agent.iter().filter(|o| !o.success)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attempt(n: u32, outcome: AttemptOutcome) -> ExecutionAttempt {
        ExecutionAttempt {
            attempt: n,
            started_at_ms: 0,
            ended_at_ms: 1,
            backoff_ms: 0,
            outcome,
        }
    }

    fn failure(message: &str) -> AttemptOutcome {
        AttemptOutcome::Failure {
            kind: FailureKind::Failed,
            message: message.to_string(),
        }
    }

    #[test]
    fn outcome_uses_last_attempt() {
        let history = vec![
            attempt(0, failure("boom")),
            attempt(1, AttemptOutcome::Success { result: json!({"ok": 1}) }),
        ];
        let fallback = (FailureKind::Aborted, String::new());
        let o = AgentOutcome::from_history("a", history, Duration::from_millis(5), fallback);
        assert!(o.success);
        assert_eq!(o.attempts, 2);
        assert_eq!(o.result, Some(json!({"ok": 1})));
        assert!(o.error.is_none());
    }

    #[test]
    fn empty_history_uses_fallback() {
        let o = AgentOutcome::failed_without_attempt(
            "a",
            FailureKind::Aborted,
            "stopped",
            Duration::ZERO,
        );
        assert!(!o.success);
        assert_eq!(o.attempts, 0);
        assert_eq!(o.failure_kind, Some(FailureKind::Aborted));
        assert_eq!(o.error.as_deref(), Some("stopped"));
    }

    #[test]
    fn job_success_unless_all_failed() {
        let ok = AgentOutcome::from_history(
            "ok",
            vec![attempt(0, AttemptOutcome::Success { result: json!(null) })],
            Duration::ZERO,
            (FailureKind::Aborted, String::new()),
        );
        let bad = AgentOutcome::from_history(
            "bad",
            vec![attempt(0, failure("x")), attempt(1, failure("y"))],
            Duration::ZERO,
            (FailureKind::Aborted, String::new()),
        );

        let mixed = JobResult::from_outcomes("t".into(), vec![ok, bad.clone()], Duration::ZERO);
        assert!(mixed.success);
        assert!(mixed.partial);
        assert_eq!(mixed.retry_count, 1);
        assert_eq!(mixed.failed_agents().count(), 1);

        let all_bad = JobResult::from_outcomes("t".into(), vec![bad], Duration::ZERO);
        assert!(!all_bad.success);
        assert!(!all_bad.partial);
    }

    #[test]
    fn job_result_wire_shape() {
        let o = AgentOutcome::from_history(
            "auditor",
            vec![attempt(0, AttemptOutcome::Success { result: json!("done") })],
            Duration::from_millis(12),
            (FailureKind::Aborted, String::new()),
        );
        let job = JobResult::from_outcomes("task-1".into(), vec![o], Duration::from_millis(20));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["taskId"], "task-1");
        assert_eq!(value["totalElapsedMs"], 20);
        assert_eq!(value["perAgent"][0]["agentName"], "auditor");
        assert_eq!(value["perAgent"][0]["result"], "done");
        assert_eq!(value["perAgent"][0]["elapsedMs"], 12);
        assert!(value["perAgent"][0].get("error").is_none());
        assert_eq!(value["perAgent"][0]["history"][0]["outcome"]["status"], "success");
    }

    #[test]
    fn only_timeouts_and_failures_retry() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Failed.is_retryable());
        assert!(!FailureKind::Setup.is_retryable());
        assert!(!FailureKind::Aborted.is_retryable());
        assert!(!FailureKind::NotReady.is_retryable());
    }
}
