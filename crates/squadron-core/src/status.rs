//! Lifecycle states and the system status snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Uninitialized,
    Ready,
    Executing,
    ShuttingDown,
    Terminated,
}

impl AgentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the whole runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Unstarted,
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl RuntimeState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub name: String,
    pub role: String,
    pub category: String,
    pub state: AgentState,
    /// Supervisors currently waiting for this instance.
    pub queue_depth: usize,
}

/// Point-in-time snapshot of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub state: RuntimeState,
    pub total_agents: usize,
    /// Tasks accepted but not yet admitted for execution.
    pub queue_depth: usize,
    /// Jobs admitted and not yet finished.
    pub active_jobs: usize,
    /// Limiter permits currently held.
    pub in_flight: usize,
    pub max_concurrency: usize,
    pub per_agent: Vec<AgentStatus>,
}

impl SystemStatus {
    pub fn agent(&self, name: &str) -> Option<&AgentStatus> {
        self.per_agent.iter().find(|a| a.name == name)
    }

    pub fn executing(&self) -> usize {
        self.per_agent
            .iter()
            .filter(|a| a.state == AgentState::Executing)
            .count()
    }
}
