//! Agents and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use squadron_core::{AgentDescriptor, Config};
use squadron_runtime::{Agent, AgentError, Orchestrator, Task};

/// Shared, ordered log of lifecycle events (`"<agent>:<event>"`).
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Runtime config with fast retries and the given concurrency cap.
pub fn config(max_concurrency: usize) -> Config {
    let mut config = Config::default();
    config.runtime.max_concurrency = max_concurrency;
    config.retry.backoff_base_ms = 100;
    config
}

pub fn orchestrator(max_concurrency: usize) -> Orchestrator {
    Orchestrator::new(config(max_concurrency))
}

pub fn descriptor(name: &str, tags: &[&str]) -> AgentDescriptor {
    AgentDescriptor::new(name)
        .with_role(format!("{name} specialist"))
        .with_category("test")
        .with_capabilities(tags.iter().copied())
}

/// Sleeps for `work`, tracking how many calls overlap per agent and globally.
pub struct Probe {
    name: String,
    work: Duration,
    own: Arc<AtomicUsize>,
    own_peak: Arc<AtomicUsize>,
    global: Arc<AtomicUsize>,
    global_peak: Arc<AtomicUsize>,
    events: EventLog,
}

/// Counters shared between probes.
#[derive(Clone, Default)]
pub struct ProbeStats {
    pub global: Arc<AtomicUsize>,
    pub global_peak: Arc<AtomicUsize>,
    pub own_peaks: Arc<Mutex<Vec<Arc<AtomicUsize>>>>,
}

impl ProbeStats {
    pub fn probe(&self, name: &str, work: Duration, events: &EventLog) -> Probe {
        let own_peak = Arc::new(AtomicUsize::new(0));
        self.own_peaks.lock().push(Arc::clone(&own_peak));
        Probe {
            name: name.to_string(),
            work,
            own: Arc::new(AtomicUsize::new(0)),
            own_peak,
            global: Arc::clone(&self.global),
            global_peak: Arc::clone(&self.global_peak),
            events: Arc::clone(events),
        }
    }

    pub fn max_own_peak(&self) -> usize {
        self.own_peaks
            .lock()
            .iter()
            .map(|p| p.load(Ordering::SeqCst))
            .max()
            .unwrap_or(0)
    }
}

fn enter(counter: &AtomicUsize, peak: &AtomicUsize) {
    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
}

#[async_trait]
impl Agent for Probe {
    async fn setup(&mut self) -> Result<(), AgentError> {
        self.events.lock().push(format!("{}:setup", self.name));
        Ok(())
    }

    async fn process(&mut self, task: &Task) -> Result<Value, AgentError> {
        enter(&self.own, &self.own_peak);
        enter(&self.global, &self.global_peak);
        tokio::time::sleep(self.work).await;
        self.global.fetch_sub(1, Ordering::SeqCst);
        self.own.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(format!("{}:done", self.name));
        Ok(json!({ "agent": self.name, "task": task.id.as_str() }))
    }

    async fn cleanup(&mut self) -> Result<(), AgentError> {
        self.events.lock().push(format!("{}:cleanup", self.name));
        Ok(())
    }
}

/// Fails every call.
pub struct AlwaysFails {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for AlwaysFails {
    async fn process(&mut self, _task: &Task) -> Result<Value, AgentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(AgentError::msg(format!("failure #{n}")))
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct Flaky {
    pub failures: usize,
    pub calls: usize,
}

#[async_trait]
impl Agent for Flaky {
    async fn process(&mut self, _task: &Task) -> Result<Value, AgentError> {
        self.calls += 1;
        if self.calls <= self.failures {
            return Err(AgentError::msg("not yet"));
        }
        Ok(json!({ "calls": self.calls }))
    }
}

/// Setup fails; process must never run.
pub struct BrokenSetup;

#[async_trait]
impl Agent for BrokenSetup {
    async fn setup(&mut self) -> Result<(), AgentError> {
        Err(AgentError::msg("missing credentials"))
    }

    async fn process(&mut self, _task: &Task) -> Result<Value, AgentError> {
        Err(AgentError::msg("process called without setup"))
    }
}

/// Counts setup and cleanup calls.
pub struct Counting {
    pub setups: Arc<AtomicUsize>,
    pub cleanups: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for Counting {
    async fn setup(&mut self) -> Result<(), AgentError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn process(&mut self, _task: &Task) -> Result<Value, AgentError> {
        Ok(Value::Null)
    }

    async fn cleanup(&mut self) -> Result<(), AgentError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
