//! Echo agent: answers every task with its own name and the payload.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Agent, AgentError};
use crate::task::Task;

/// Agent with no external process; used for registry entries without a command.
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn process(&mut self, task: &Task) -> Result<Value, AgentError> {
        Ok(json!({
            "agent": self.name,
            "taskId": task.id,
            "priority": task.priority,
            "payload": task.payload,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::{SubmitOptions, TaskTarget};

    #[tokio::test]
    async fn echoes_payload() {
        let mut agent = EchoAgent::new("echo");
        let task = Task::new(
            &TaskTarget::from("say"),
            json!({"text": "hi"}),
            SubmitOptions::default().with_task_id("t-1"),
        );
        let out = agent.process(&task).await.unwrap();
        assert_eq!(out["agent"], "echo");
        assert_eq!(out["taskId"], "t-1");
        assert_eq!(out["priority"], "medium");
        assert_eq!(out["payload"]["text"], "hi");
    }
}
