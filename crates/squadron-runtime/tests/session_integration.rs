#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Session-hosted execution: plan generation, status folding, timeouts,
//! teardown guarantees and the local process host.

mod common;

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use squadron_core::{ExecutionPlan, FailureKind, PaneStatus};
use squadron_runtime::session::{
    ProcessSessionHost, SessionHandle, SessionHost, SessionHostError, run_session,
};
use squadron_runtime::{EchoAgent, Orchestrator, OrchestratorError, SubmitOptions, TaskTarget};

use common::{config, descriptor};

/// Replays scripted poll results; the last one repeats forever.
#[derive(Default)]
struct ScriptedHost {
    polls: Mutex<VecDeque<Vec<PaneStatus>>>,
    fail_provision: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHost {
    fn new(polls: Vec<Vec<PaneStatus>>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SessionHost for ScriptedHost {
    async fn provision(&self, plan: &ExecutionPlan) -> Result<SessionHandle, SessionHostError> {
        self.calls.lock().push(format!("provision:{}", plan.session_name));
        if self.fail_provision {
            return Err(SessionHostError::Provision {
                session: plan.session_name.clone(),
                reason: "no terminal multiplexer".to_string(),
            });
        }
        Ok(SessionHandle::for_plan(plan))
    }

    async fn poll_status(
        &self,
        _handle: &SessionHandle,
    ) -> Result<Vec<PaneStatus>, SessionHostError> {
        self.calls.lock().push("poll".to_string());
        let mut polls = self.polls.lock();
        let next = if polls.len() > 1 {
            polls.pop_front()
        } else {
            polls.front().cloned()
        };
        Ok(next.unwrap_or_default())
    }

    async fn teardown(&self, handle: &SessionHandle) -> Result<(), SessionHostError> {
        self.calls.lock().push(format!("teardown:{}", handle.session_name));
        Ok(())
    }
}

fn succeeded(output: &str) -> PaneStatus {
    PaneStatus::Succeeded {
        output: output.to_string(),
    }
}

async fn hosted_runtime(session_timeout_secs: u64) -> Orchestrator {
    let mut config = config(2);
    config.session.poll_interval_ms = 100;
    config.session.timeout_secs = session_timeout_secs;
    let orch = Orchestrator::new(config);
    orch.register_agent(descriptor("writer", &["writing"]), EchoAgent::new("writer"))
        .unwrap();
    orch.register_agent(descriptor("editor", &["writing", "review"]), EchoAgent::new("editor"))
        .unwrap();
    orch.initialize_all().await.unwrap();
    orch
}

#[tokio::test]
async fn plan_is_deterministic_and_serializable() {
    let orch = hosted_runtime(60).await;
    let options = SubmitOptions::default().with_task_id("0123456789abcdef");

    let plan = orch
        .plan("writing review", json!({"draft": 2}), options.clone())
        .unwrap();
    let again = orch
        .plan("writing review", json!({"draft": 2}), options)
        .unwrap();
    assert_eq!(plan, again);

    assert_eq!(plan.session_name, "squadron-01234567");
    assert_eq!(plan.agent_names().collect::<Vec<_>>(), vec!["editor", "writer"]);

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["taskId"], "0123456789abcdef");
    assert_eq!(json["panes"][0]["agentName"], "editor");
    assert_eq!(json["panes"][1]["index"], 1);

    orch.shutdown_all(None).await;
}

#[tokio::test(start_paused = true)]
async fn pane_statuses_fold_into_job_result() {
    let orch = hosted_runtime(60).await;
    let host = ScriptedHost::new(vec![
        vec![PaneStatus::Pending, PaneStatus::Pending],
        vec![succeeded("{\"words\": 120}"), PaneStatus::Pending],
        vec![
            // A late report for pane 0 must not replace its first result.
            PaneStatus::Failed {
                exit_code: Some(9),
                message: "late".to_string(),
            },
            PaneStatus::Failed {
                exit_code: Some(1),
                message: "style check failed".to_string(),
            },
        ],
    ]);

    let result = orch
        .execute_with_host(
            &host,
            TaskTarget::agents(["writer", "editor"]),
            json!(null),
            SubmitOptions::default().with_task_id("session-fold"),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.partial);
    assert_eq!(result.per_agent.len(), 2);
    assert_eq!(result.per_agent[0].agent_name, "writer");
    assert_eq!(result.per_agent[0].result, Some(json!({"words": 120})));
    assert_eq!(
        result.per_agent[1].error.as_deref(),
        Some("exit code 1: style check failed")
    );

    let calls = host.calls();
    assert_eq!(calls.first().unwrap(), "provision:squadron-session-");
    assert_eq!(calls.last().unwrap(), "teardown:squadron-session-");
    assert_eq!(calls.iter().filter(|c| *c == "poll").count(), 3);

    orch.shutdown_all(None).await;
}

#[tokio::test(start_paused = true)]
async fn silent_panes_time_out_and_session_is_torn_down() {
    let orch = hosted_runtime(2).await;
    let host = ScriptedHost::new(vec![vec![succeeded("done"), PaneStatus::Pending]]);

    let result = orch
        .execute_with_host(
            &host,
            TaskTarget::agents(["writer", "editor"]),
            json!(null),
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    assert!(result.partial);
    assert_eq!(result.per_agent[0].result, Some(json!("done")));
    let editor = &result.per_agent[1];
    assert_eq!(editor.failure_kind, Some(FailureKind::Timeout));
    assert!(host.calls().last().unwrap().starts_with("teardown:"));

    orch.shutdown_all(None).await;
}

#[tokio::test]
async fn provision_failure_is_surfaced_without_teardown() {
    let orch = hosted_runtime(60).await;
    let host = ScriptedHost {
        fail_provision: true,
        ..ScriptedHost::default()
    };

    let err = orch
        .execute_with_host(&host, "writing", json!(null), SubmitOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::SessionHost(SessionHostError::Provision { .. })
    ));
    assert_eq!(host.calls().len(), 1);

    orch.shutdown_all(None).await;
}

#[cfg(unix)]
#[tokio::test]
async fn process_host_runs_one_child_per_pane() {
    let script = r#"
        if [ "$SQUADRON_AGENT" = "editor" ]; then
            echo "red pen ran dry" >&2
            exit 3
        fi
        printf '{"agent":"%s","pane":%s,"payload":%s}' \
            "$SQUADRON_AGENT" "$SQUADRON_PANE" "$SQUADRON_PAYLOAD"
    "#;
    let host = ProcessSessionHost::shell(script, Duration::from_secs(1));
    let agents = [
        squadron_core::AgentDescriptor::new("writer"),
        squadron_core::AgentDescriptor::new("editor"),
    ];
    let plan = ExecutionPlan::new(
        "process-host-1".into(),
        squadron_core::Priority::High,
        json!({"chapter": 4}),
        &agents,
    );

    let result = run_session(&host, &plan, Duration::from_millis(20), Duration::from_secs(10))
        .await
        .unwrap();

    let writer = result.outcome("writer").unwrap();
    assert_eq!(
        writer.result,
        Some(json!({"agent": "writer", "pane": 0, "payload": {"chapter": 4}}))
    );
    let editor = result.outcome("editor").unwrap();
    assert_eq!(editor.error.as_deref(), Some("exit code 3: red pen ran dry"));

    // The session is gone after the run.
    let handle = SessionHandle::for_plan(&plan);
    assert!(matches!(
        host.poll_status(&handle).await,
        Err(SessionHostError::UnknownSession { .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn process_host_stops_panes_that_outlive_the_session() {
    let host = ProcessSessionHost::shell("sleep 30", Duration::from_millis(200));
    let agents = [squadron_core::AgentDescriptor::new("sleeper")];
    let plan = ExecutionPlan::new(
        "process-host-2".into(),
        squadron_core::Priority::Low,
        json!(null),
        &agents,
    );

    let started = std::time::Instant::now();
    let result = run_session(&host, &plan, Duration::from_millis(20), Duration::from_millis(300))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.per_agent[0].failure_kind, Some(FailureKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(10));
}
