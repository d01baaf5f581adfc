//! Command agent: runs one external process per task.
//!
//! The task is written to the child's stdin as a single JSON document:
//! `{"taskId", "description", "priority", "payload", "context"}`. A zero exit
//! status is success; stdout is parsed as JSON, falling back to the trimmed
//! text. The child is killed if the attempt is dropped (timeout or abort).

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Agent, AgentError};
use crate::task::Task;

pub struct CommandAgent {
    name: String,
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl CommandAgent {
    /// Build from an argv; the first element is the program.
    pub fn new(name: impl Into<String>, argv: &[String]) -> Result<Self, AgentError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AgentError::msg("command must not be empty"))?;
        Ok(Self {
            name: name.into(),
            program: program.clone(),
            args: args.to_vec(),
            env: HashMap::new(),
        })
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn request(task: &Task) -> Value {
        json!({
            "taskId": task.id,
            "description": task.description,
            "priority": task.priority,
            "payload": task.payload,
            "context": task.context,
        })
    }
}

/// Parse process output as JSON, keeping plain text as a string value.
pub fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

#[async_trait]
impl Agent for CommandAgent {
    async fn setup(&mut self) -> Result<(), AgentError> {
        info!(agent = %self.name, program = %self.program, "Command agent configured");
        Ok(())
    }

    async fn process(&mut self, task: &Task) -> Result<Value, AgentError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .env("SQUADRON_TASK_ID", task.id.as_str())
            .env("SQUADRON_AGENT", &self.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(agent = %self.name, task_id = %task.id, "Spawning command agent process");
        let mut child = cmd.spawn()?;

        // Stdin is fed from its own task so a child echoing its input never
        // blocks on a full stdout pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let body = serde_json::to_vec(&Self::request(task));
            let agent = self.name.clone();
            tokio::spawn(async move {
                let body = body?;
                // A child that never reads stdin closes the pipe early; not an error.
                if let Err(e) = stdin.write_all(&body).await {
                    debug!(agent = %agent, error = %e, "Child closed stdin early");
                }
                Ok::<(), serde_json::Error>(())
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| AgentError::msg(format!("stdin writer failed: {e}")))??;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            Ok(parse_output(&stdout))
        } else {
            Err(AgentError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
