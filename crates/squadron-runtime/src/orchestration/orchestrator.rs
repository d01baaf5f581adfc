//! Runtime orchestrator.
//!
//! [`Orchestrator`] is the high-level coordinator that:
//! - registers agents and runs their eager setup
//! - accepts tasks, selects agents and queues one job per task
//! - dispatches queued jobs in priority order under the concurrency limiter
//! - fans each job out to one supervisor per selected agent and aggregates
//!   the results
//! - drains and shuts the runtime down (grace period, then abort)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use squadron_core::job::duration_millis;
use squadron_core::{
    AgentDescriptor, AgentOutcome, Config, ExecutionPlan, FailureKind, JobResult, RuntimeState,
    SystemStatus, TaskId,
};

use super::limiter::{ConcurrencyLimiter, LimiterPermit};
use super::queue::TaskQueue;
use super::selector::AgentRegistry;
use super::supervisor::{ExecutionSupervisor, RetryPolicy, ShutdownSignals};
use crate::agent::{Agent, AgentSlot, BoxedAgent};
use crate::error::{OrchestratorError, Result};
use crate::session::{SessionHost, run_session};
use crate::task::{SubmitOptions, Task, TaskTarget};

/// How long aborted attempts get to unwind before cleanup starts.
const ABORT_SETTLE: Duration = Duration::from_secs(5);

/// Upper bound on one agent's `cleanup` during shutdown.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

type Reply = oneshot::Sender<Result<JobResult>>;

struct PendingJob {
    agents: Vec<Arc<AgentSlot>>,
    reply: Reply,
}

/// Registry plus one lifecycle slot per registered agent, index-aligned.
struct Roster {
    registry: AgentRegistry,
    slots: Vec<Arc<AgentSlot>>,
}

struct Inner {
    config: Config,
    retry: RetryPolicy,
    roster: RwLock<Roster>,
    queue: TaskQueue,
    limiter: Arc<ConcurrencyLimiter>,
    state: watch::Sender<RuntimeState>,
    draining: watch::Sender<bool>,
    abort: watch::Sender<bool>,
    pending: Mutex<HashMap<TaskId, PendingJob>>,
    active_jobs: watch::Sender<usize>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    fn signals(&self) -> ShutdownSignals {
        ShutdownSignals::new(self.draining.subscribe(), self.abort.subscribe())
    }
}

/// Handle to a submitted task; resolves to its [`JobResult`].
#[derive(Debug)]
pub struct JobTicket {
    task_id: TaskId,
    reply: oneshot::Receiver<Result<JobResult>>,
}

impl JobTicket {
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn wait(self) -> Result<JobResult> {
        self.reply
            .await
            .unwrap_or(Err(OrchestratorError::NotAcceptingTasks {
                state: RuntimeState::Stopped,
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub agent: String,
    pub error: String,
}

/// What `shutdown_all` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Agents whose `cleanup` ran successfully.
    pub cleaned: Vec<String>,
    pub cleanup_failures: Vec<CleanupFailure>,
    /// Submissions answered with `NotAcceptingTasks` before admission.
    pub rejected: usize,
    /// Jobs still running when the grace period expired.
    pub abandoned: usize,
}

/// The agent runtime.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let limiter = Arc::new(ConcurrencyLimiter::new(config.runtime.max_concurrency));
        let registry =
            AgentRegistry::new(config.runtime.max_candidates, config.runtime.min_relevance);
        let retry = RetryPolicy::from_config(&config.retry, config.runtime.default_timeout());
        let (state, _) = watch::channel(RuntimeState::Unstarted);
        let (draining, _) = watch::channel(false);
        let (abort, _) = watch::channel(false);
        let (active_jobs, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                config,
                retry,
                roster: RwLock::new(Roster {
                    registry,
                    slots: Vec::new(),
                }),
                queue: TaskQueue::new(),
                limiter,
                state,
                draining,
                abort,
                pending: Mutex::new(HashMap::new()),
                active_jobs,
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.inner.state()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Peak number of limiter permits held at once since startup.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.limiter.peak_in_flight()
    }

    pub fn register_agent(
        &self,
        descriptor: AgentDescriptor,
        agent: impl Agent + 'static,
    ) -> Result<()> {
        self.register_agents([(descriptor, Box::new(agent) as BoxedAgent)])
    }

    /// Register agents in bulk. Only allowed before `initialize_all`.
    ///
    /// The batch is all-or-nothing: a duplicate or invalid descriptor leaves
    /// the registry unchanged.
    pub fn register_agents<I>(&self, agents: I) -> Result<()>
    where
        I: IntoIterator<Item = (AgentDescriptor, BoxedAgent)>,
    {
        let mut roster = self.inner.roster.write();
        let state = self.state();
        if state != RuntimeState::Unstarted {
            return Err(OrchestratorError::RegistrationClosed { state });
        }

        let mut staged = roster.registry.clone();
        let mut slots = Vec::new();
        for (descriptor, agent) in agents {
            let descriptor = staged.register(descriptor)?;
            slots.push(Arc::new(AgentSlot::new(descriptor, agent)));
        }

        info!(added = slots.len(), total = staged.len(), "Agents registered");
        roster.registry = staged;
        roster.slots.extend(slots);
        Ok(())
    }

    /// Run `setup` on every agent, then start accepting tasks.
    ///
    /// Fails fast on the first setup error; agents already set up are
    /// cleaned up and the runtime ends `Stopped`.
    pub async fn initialize_all(&self) -> Result<()> {
        let mut observed = RuntimeState::Unstarted;
        let won = self.inner.state.send_if_modified(|s| {
            observed = *s;
            if *s == RuntimeState::Unstarted {
                *s = RuntimeState::Initializing;
                true
            } else {
                false
            }
        });
        if !won {
            return Err(OrchestratorError::AlreadyInitialized { state: observed });
        }

        let slots = self.inner.roster.read().slots.clone();
        info!(agents = slots.len(), "Initializing agents");

        for slot in &slots {
            if let Err(source) = slot.setup().await {
                error!(
                    agent = %slot.name(),
                    error = %source,
                    "Initialization failed, rolling back"
                );
                for done in slots.iter().rev() {
                    if let Err(e) = done.cleanup().await {
                        warn!(agent = %done.name(), error = %e, "Rollback cleanup failed");
                    }
                }
                self.inner.draining.send_replace(true);
                self.inner.limiter.close();
                self.inner.state.send_replace(RuntimeState::Stopped);
                return Err(OrchestratorError::Setup {
                    agent: slot.name().to_string(),
                    source,
                });
            }
        }

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&self.inner)));
        *self.inner.dispatcher.lock() = Some(dispatcher);

        let mut observed = RuntimeState::Initializing;
        let running = self.inner.state.send_if_modified(|s| {
            observed = *s;
            if *s == RuntimeState::Initializing {
                *s = RuntimeState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            // Shutdown started while agents were being set up.
            return Err(OrchestratorError::NotAcceptingTasks { state: observed });
        }
        info!(
            max_concurrency = self.inner.limiter.max_concurrency(),
            "Runtime running"
        );
        Ok(())
    }

    /// Select agents and queue the task; the returned ticket resolves to the
    /// job result.
    pub fn submit(
        &self,
        target: impl Into<TaskTarget>,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<JobTicket> {
        let state = self.state();
        if state != RuntimeState::Running {
            return Err(OrchestratorError::NotAcceptingTasks { state });
        }

        let target = target.into();
        let agents: Vec<Arc<AgentSlot>> = {
            let roster = self.inner.roster.read();
            roster
                .registry
                .select_indices(&target, &options.context)?
                .into_iter()
                .map(|index| Arc::clone(&roster.slots[index]))
                .collect()
        };
        let task = Task::new(&target, payload, options);

        // Held across the state re-check and enqueue so shutdown cannot
        // miss a submission racing with it.
        let mut pending = self.inner.pending.lock();
        let state = self.state();
        if state != RuntimeState::Running {
            return Err(OrchestratorError::NotAcceptingTasks { state });
        }
        if pending.contains_key(&task.id) {
            return Err(OrchestratorError::DuplicateTask {
                id: task.id.to_string(),
            });
        }

        let (reply, receiver) = oneshot::channel();
        let ticket = JobTicket {
            task_id: task.id.clone(),
            reply: receiver,
        };
        debug!(
            task_id = %task.id,
            priority = %task.priority,
            agents = ?agents.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Task queued"
        );
        pending.insert(task.id.clone(), PendingJob { agents, reply });
        self.inner.queue.enqueue(task);
        drop(pending);
        Ok(ticket)
    }

    /// Submit a task and wait for every selected agent to reach a terminal outcome.
    pub async fn execute_task(
        &self,
        target: impl Into<TaskTarget>,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<JobResult> {
        self.submit(target, payload, options)?.wait().await
    }

    /// Non-blocking snapshot of the runtime and every agent.
    pub fn system_status(&self) -> SystemStatus {
        let roster = self.inner.roster.read();
        SystemStatus {
            state: self.state(),
            total_agents: roster.slots.len(),
            queue_depth: self.inner.queue.len(),
            active_jobs: *self.inner.active_jobs.borrow(),
            in_flight: self.inner.limiter.in_flight(),
            max_concurrency: self.inner.limiter.max_concurrency(),
            per_agent: roster.slots.iter().map(|slot| slot.status()).collect(),
        }
    }

    /// Build the session plan for a task without running anything.
    pub fn plan(
        &self,
        target: impl Into<TaskTarget>,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<ExecutionPlan> {
        let target = target.into();
        let roster = self.inner.roster.read();
        let indices = roster
            .registry
            .select_indices(&target, &options.context)?;
        let descriptors = roster.registry.descriptors();
        Ok(ExecutionPlan::new(
            options.task_id.unwrap_or_else(TaskId::generate),
            options.priority,
            payload,
            indices.iter().map(|&index| descriptors[index].as_ref()),
        ))
    }

    /// Run a task's fan-out on an external session host instead of in-process.
    pub async fn execute_with_host(
        &self,
        host: &dyn SessionHost,
        target: impl Into<TaskTarget>,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<JobResult> {
        let state = self.state();
        if state != RuntimeState::Running {
            return Err(OrchestratorError::NotAcceptingTasks { state });
        }
        let plan = self.plan(target, payload, options)?;
        let session = &self.inner.config.session;
        Ok(run_session(host, &plan, session.poll_interval(), session.timeout()).await?)
    }

    /// Drain and stop the runtime.
    ///
    /// Queued tasks are rejected; running attempts get `grace` (default from
    /// config) to finish before they are aborted; then every agent is cleaned
    /// up. Calling it again after `Stopped` is a no-op.
    pub async fn shutdown_all(&self, grace: Option<Duration>) -> ShutdownReport {
        let grace = grace.unwrap_or_else(|| self.inner.config.runtime.shutdown_grace());

        let mut previous = RuntimeState::Stopped;
        {
            let _pending = self.inner.pending.lock();
            self.inner.state.send_if_modified(|s| {
                previous = *s;
                if matches!(*s, RuntimeState::Draining | RuntimeState::Stopped) {
                    false
                } else {
                    *s = RuntimeState::Draining;
                    true
                }
            });
        }
        match previous {
            RuntimeState::Stopped => return ShutdownReport::default(),
            RuntimeState::Draining => {
                debug!("Shutdown already in progress, waiting for it");
                let mut rx = self.inner.state.subscribe();
                let _ = rx.wait_for(|s| *s == RuntimeState::Stopped).await;
                return ShutdownReport::default();
            }
            _ => {}
        }

        info!(grace_ms = duration_millis(grace), "Shutting down runtime");
        self.inner.draining.send_replace(true);

        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(handle) = dispatcher
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Dispatcher task failed");
        }

        let mut report = ShutdownReport {
            rejected: self.reject_pending(),
            ..ShutdownReport::default()
        };

        let mut active = self.inner.active_jobs.subscribe();
        let drained = tokio::time::timeout(grace, active.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if !drained {
            report.abandoned = *self.inner.active_jobs.borrow();
            warn!(
                abandoned = report.abandoned,
                "Grace period expired, abandoning in-flight attempts"
            );
            self.inner.abort.send_replace(true);
            let _ = tokio::time::timeout(ABORT_SETTLE, active.wait_for(|n| *n == 0)).await;
        }
        self.inner.limiter.close();

        let slots = self.inner.roster.read().slots.clone();
        for slot in slots.iter().rev() {
            match tokio::time::timeout(CLEANUP_TIMEOUT, slot.cleanup()).await {
                Ok(Ok(true)) => report.cleaned.push(slot.name().to_string()),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => report.cleanup_failures.push(CleanupFailure {
                    agent: slot.name().to_string(),
                    error: e.to_string(),
                }),
                Err(_) => report.cleanup_failures.push(CleanupFailure {
                    agent: slot.name().to_string(),
                    error: "cleanup timed out".to_string(),
                }),
            }
        }
        report.cleaned.reverse();

        self.inner.state.send_replace(RuntimeState::Stopped);
        info!(
            cleaned = report.cleaned.len(),
            failures = report.cleanup_failures.len(),
            rejected = report.rejected,
            abandoned = report.abandoned,
            "Runtime stopped"
        );
        report
    }

    /// Answer every submission that was never admitted.
    fn reject_pending(&self) -> usize {
        let queued = self.inner.queue.drain();
        let mut pending = self.inner.pending.lock();
        let rejected = pending.len();
        for (task_id, job) in pending.drain() {
            debug!(%task_id, "Rejecting queued task");
            let _ = job.reply.send(Err(OrchestratorError::NotAcceptingTasks {
                state: RuntimeState::Draining,
            }));
        }
        drop(pending);
        if rejected > 0 {
            info!(rejected, queued = queued.len(), "Rejected queued tasks");
        }
        rejected
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Lets the dispatcher exit if the runtime was never shut down.
        self.inner.draining.send_replace(true);
    }
}

/// Admit queued tasks in priority order, one limiter permit per job.
///
/// The permit is taken before the task is dequeued so that a task queued
/// while every permit is busy still competes on priority.
async fn dispatch_loop(inner: Arc<Inner>) {
    let signals = inner.signals();
    debug!("Dispatcher started");
    loop {
        if signals.is_draining() {
            break;
        }
        if inner.queue.is_empty() {
            let stop = tokio::select! {
                () = inner.queue.notified() => false,
                () = signals.draining() => true,
            };
            if stop {
                break;
            }
            continue;
        }

        let permit = tokio::select! {
            permit = inner.limiter.acquire() => permit.ok(),
            () = signals.draining() => None,
        };
        // Whatever is still queued is answered by `shutdown_all`.
        let Some(permit) = permit else {
            break;
        };
        if signals.is_draining() {
            break;
        }
        let Some(task) = inner.queue.dequeue_next() else {
            continue;
        };
        let Some(job) = inner.pending.lock().remove(&task.id) else {
            continue;
        };

        inner.active_jobs.send_modify(|n| *n += 1);
        tokio::spawn(run_job(Arc::clone(&inner), task, job, permit));
    }
    debug!("Dispatcher stopped");
}

/// Fan a job out to one supervisor per agent and deliver the aggregate.
async fn run_job(inner: Arc<Inner>, task: Task, job: PendingJob, admission: LimiterPermit) {
    let started = Instant::now();
    let task = Arc::new(task);
    let supervisor = ExecutionSupervisor::new(Arc::clone(&inner.limiter), inner.signals());
    let names: Vec<String> = job.agents.iter().map(|s| s.name().to_string()).collect();
    info!(task_id = %task.id, priority = %task.priority, agents = ?names, "Job started");

    let mut admission = Some(admission);
    let handles: Vec<_> = job
        .agents
        .into_iter()
        .map(|slot| {
            let policy = inner
                .retry
                .for_agent(&slot.descriptor().policy, task.max_retries);
            let supervisor = supervisor.clone();
            let task = Arc::clone(&task);
            let permit = admission.take();
            tokio::spawn(async move { supervisor.run(&slot, &task, &policy, permit).await })
        })
        .collect();

    let per_agent: Vec<AgentOutcome> = join_all(handles)
        .await
        .into_iter()
        .zip(names)
        .map(|(joined, name)| {
            joined.unwrap_or_else(|e| {
                error!(agent = %name, task_id = %task.id, error = %e, "Supervisor task failed");
                AgentOutcome::failed_without_attempt(
                    name,
                    FailureKind::Failed,
                    format!("supervisor task failed: {e}"),
                    started.elapsed(),
                )
            })
        })
        .collect();

    let result = JobResult::from_outcomes(task.id.clone(), per_agent, started.elapsed());
    info!(
        task_id = %task.id,
        success = result.success,
        partial = result.partial,
        retries = result.retry_count,
        elapsed_ms = result.total_elapsed_ms,
        "Job finished"
    );
    let _ = job.reply.send(Ok(result));
    inner.active_jobs.send_modify(|n| *n = n.saturating_sub(1));
}
