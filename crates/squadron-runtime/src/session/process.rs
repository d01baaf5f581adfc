//! Session host that runs each pane as a local child process.
//!
//! Every pane runs the same command template; the pane's identity is passed
//! through the environment:
//!
//! - `SQUADRON_TASK_ID`, `SQUADRON_SESSION`
//! - `SQUADRON_AGENT`, `SQUADRON_PANE`
//! - `SQUADRON_PAYLOAD` (JSON)
//!
//! Exit status 0 is success with stdout as the output. Teardown stops panes
//! still running: SIGTERM, wait the grace period, then SIGKILL.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use squadron_core::{ExecutionPlan, PaneStatus};

use super::types::{SessionHandle, SessionHost, SessionHostError};

struct Pane {
    child: Child,
    status: PaneStatus,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

pub struct ProcessSessionHost {
    command: Vec<String>,
    terminate_grace: Duration,
    sessions: Mutex<HashMap<String, Vec<Pane>>>,
}

impl ProcessSessionHost {
    pub fn new(command: Vec<String>, terminate_grace: Duration) -> Self {
        Self {
            command,
            terminate_grace,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Convenience for a shell one-liner run via `sh -c`.
    pub fn shell(script: impl Into<String>, terminate_grace: Duration) -> Self {
        Self::new(
            vec!["sh".to_string(), "-c".to_string(), script.into()],
            terminate_grace,
        )
    }

    fn spawn_pane(
        &self,
        plan: &ExecutionPlan,
        agent: &str,
        index: usize,
        payload: &str,
    ) -> std::io::Result<Pane> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty pane command")
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("SQUADRON_TASK_ID", plan.task_id.as_str())
            .env("SQUADRON_SESSION", &plan.session_name)
            .env("SQUADRON_AGENT", agent)
            .env("SQUADRON_PANE", index.to_string())
            .env("SQUADRON_PAYLOAD", payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().map(collect);
        let stderr = child.stderr.take().map(collect);
        debug!(
            session = %plan.session_name,
            agent,
            pane = index,
            pid = ?child.id(),
            "Pane spawned"
        );
        Ok(Pane {
            child,
            status: PaneStatus::Pending,
            stdout,
            stderr,
        })
    }
}

fn collect<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Err(e) = pipe.read_to_string(&mut buf).await {
            debug!(error = %e, "Pane output read failed");
        }
        buf
    })
}

async fn joined(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

async fn exit_status(exit: ExitStatus, pane: &mut Pane) -> PaneStatus {
    let stdout = joined(pane.stdout.take()).await;
    let stderr = joined(pane.stderr.take()).await;
    if exit.success() {
        PaneStatus::Succeeded {
            output: stdout.trim().to_string(),
        }
    } else {
        let stderr = stderr.trim();
        PaneStatus::Failed {
            exit_code: exit.code(),
            message: if stderr.is_empty() {
                format!("exited with {exit}")
            } else {
                stderr.to_string()
            },
        }
    }
}

#[async_trait]
impl SessionHost for ProcessSessionHost {
    async fn provision(&self, plan: &ExecutionPlan) -> Result<SessionHandle, SessionHostError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&plan.session_name) {
            return Err(SessionHostError::Provision {
                session: plan.session_name.clone(),
                reason: "session already exists".to_string(),
            });
        }

        let payload = plan.payload.to_string();
        let mut panes = Vec::with_capacity(plan.pane_count());
        for pane in &plan.panes {
            match self.spawn_pane(plan, &pane.agent_name, pane.index, &payload) {
                Ok(p) => panes.push(p),
                Err(e) => {
                    for mut spawned in panes {
                        let _ = spawned.child.start_kill();
                    }
                    return Err(SessionHostError::Provision {
                        session: plan.session_name.clone(),
                        reason: format!("pane {} ({}): {e}", pane.index, pane.agent_name),
                    });
                }
            }
        }

        info!(session = %plan.session_name, panes = panes.len(), "Process session started");
        sessions.insert(plan.session_name.clone(), panes);
        drop(sessions);
        Ok(SessionHandle::for_plan(plan))
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn poll_status(
        &self,
        handle: &SessionHandle,
    ) -> Result<Vec<PaneStatus>, SessionHostError> {
        let mut sessions = self.sessions.lock().await;
        let panes = sessions.get_mut(&handle.session_name).ok_or_else(|| {
            SessionHostError::UnknownSession {
                session: handle.session_name.clone(),
            }
        })?;

        let mut statuses = Vec::with_capacity(panes.len());
        for pane in panes.iter_mut() {
            if !pane.status.is_terminal() {
                match pane.child.try_wait() {
                    Ok(Some(exit)) => {
                        let status = exit_status(exit, pane).await;
                        pane.status = status;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return Err(SessionHostError::Poll {
                            session: handle.session_name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            statuses.push(pane.status.clone());
        }
        Ok(statuses)
    }

    async fn teardown(&self, handle: &SessionHandle) -> Result<(), SessionHostError> {
        let panes = self
            .sessions
            .lock()
            .await
            .remove(&handle.session_name)
            .ok_or_else(|| SessionHostError::UnknownSession {
                session: handle.session_name.clone(),
            })?;

        for mut pane in panes {
            if matches!(pane.child.try_wait(), Ok(None)) {
                terminate_process(&mut pane.child, self.terminate_grace).await;
            }
        }
        info!(session = %handle.session_name, "Process session torn down");
        Ok(())
    }
}

/// Terminate a process: SIGTERM, wait grace period, then SIGKILL.
async fn terminate_process(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("Grace period expired, sending SIGKILL");
        let _ = child.kill().await;
    }
}
