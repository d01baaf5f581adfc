//! Submitted tasks and submission options.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use squadron_core::{Priority, TaskId};

/// How a task picks its agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTarget {
    /// Free-text description matched against capability tags.
    Description(String),
    /// Explicit agent names, used verbatim in this order.
    Agents(Vec<String>),
}

impl TaskTarget {
    pub fn agents<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Agents(names.into_iter().map(Into::into).collect())
    }

    /// Human-readable label for logs and errors.
    pub fn label(&self) -> String {
        match self {
            Self::Description(text) => text.clone(),
            Self::Agents(names) => names.join(","),
        }
    }
}

impl From<&str> for TaskTarget {
    fn from(description: &str) -> Self {
        Self::Description(description.to_string())
    }
}

impl From<String> for TaskTarget {
    fn from(description: String) -> Self {
        Self::Description(description)
    }
}

/// Optional knobs for one submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub priority: Priority,
    /// Time budget from submission; becomes the task's absolute deadline.
    pub deadline: Option<Duration>,
    /// Overrides both the agent policy and the global retry default.
    pub max_retries: Option<u32>,
    /// Caller-supplied id; generated when absent.
    pub task_id: Option<TaskId>,
    /// Free-form context; `capabilities` / `capability` act as selection hints.
    pub context: HashMap<String, Value>,
}

impl SubmitOptions {
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(budget);
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_task_id(mut self, id: impl Into<TaskId>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// A unit of work accepted by the runtime. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub priority: Priority,
    pub payload: Value,
    pub context: HashMap<String, Value>,
    pub max_retries: Option<u32>,
    pub submitted_at: Instant,
    pub deadline: Option<Instant>,
}

impl Task {
    pub fn new(target: &TaskTarget, payload: Value, options: SubmitOptions) -> Self {
        let submitted_at = Instant::now();
        Self {
            id: options.task_id.unwrap_or_else(TaskId::generate),
            description: target.label(),
            priority: options.priority,
            payload,
            context: options.context,
            max_retries: options.max_retries,
            submitted_at,
            deadline: options.deadline.map(|budget| submitted_at + budget),
        }
    }

    /// Time left before the deadline; `None` when the task has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}
