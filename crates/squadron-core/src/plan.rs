//! Execution plans handed to an external session host, and the per-pane
//! status it reports back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::AgentDescriptor;
use crate::task::{Priority, TaskId};

/// Session name prefix for provisioned sessions.
pub const SESSION_PREFIX: &str = "squadron";

/// One pane of a session: exactly one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanePlan {
    pub index: usize,
    pub agent_name: String,
    pub role: String,
    pub category: String,
}

/// Deterministic, serializable plan for a session host.
///
/// Panes follow selection order, so the same task and selection always yield
/// the same plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub task_id: TaskId,
    pub session_name: String,
    pub priority: Priority,
    pub payload: Value,
    pub panes: Vec<PanePlan>,
}

impl ExecutionPlan {
    pub fn new<'a>(
        task_id: TaskId,
        priority: Priority,
        payload: Value,
        agents: impl IntoIterator<Item = &'a AgentDescriptor>,
    ) -> Self {
        let panes = agents
            .into_iter()
            .enumerate()
            .map(|(index, d)| PanePlan {
                index,
                agent_name: d.name.clone(),
                role: d.role.clone(),
                category: d.category.clone(),
            })
            .collect();
        let session_name = format!("{SESSION_PREFIX}-{}", task_id.short());
        Self {
            task_id,
            session_name,
            priority,
            payload,
            panes,
        }
    }

    pub const fn pane_count(&self) -> usize {
        self.panes.len()
    }

    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.panes.iter().map(|p| p.agent_name.as_str())
    }
}

/// Status of one pane as reported by the session host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaneStatus {
    Pending,
    Succeeded {
        output: String,
    },
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
}

impl PaneStatus {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("counsel").with_role("Counsel").with_category("legal"),
            AgentDescriptor::new("auditor").with_category("finance"),
        ]
    }

    #[test]
    fn plan_is_deterministic() {
        let a = agents();
        let p1 = ExecutionPlan::new("0123456789".into(), Priority::High, json!({"q": 1}), &a);
        let p2 = ExecutionPlan::new("0123456789".into(), Priority::High, json!({"q": 1}), &a);
        assert_eq!(p1, p2);
        assert_eq!(
            serde_json::to_string(&p1).unwrap(),
            serde_json::to_string(&p2).unwrap()
        );
    }

    #[test]
    fn panes_follow_selection_order() {
        let plan = ExecutionPlan::new("abcdefghij".into(), Priority::Low, json!(null), &agents());
        assert_eq!(plan.session_name, "squadron-abcdefgh");
        assert_eq!(plan.pane_count(), 2);
        assert_eq!(plan.agent_names().collect::<Vec<_>>(), vec!["counsel", "auditor"]);
        assert_eq!(plan.panes[1].index, 1);
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["panes"][0]["agentName"], "counsel");
        assert_eq!(value["priority"], "low");
    }

    #[test]
    fn pane_status_terminality() {
        assert!(!PaneStatus::Pending.is_terminal());
        assert!(PaneStatus::Succeeded { output: String::new() }.is_terminal());
        let failed = PaneStatus::Failed {
            exit_code: Some(2),
            message: "bad".into(),
        };
        assert!(failed.is_terminal());
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["exit_code"], 2);
    }
}
