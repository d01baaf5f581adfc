//! Supervised execution of one (task, agent) pair.
//!
//! The supervisor drives an explicit state machine:
//!
//! ```text
//! Attempting(n) --success / non-retryable / exhausted--> Terminal
//! Attempting(n) --retryable failure--> Backoff(n, base * 2^n) --> Attempting(n + 1)
//! Backoff       --runtime draining--> Terminal
//! ```
//!
//! Each attempt first runs the agent's one-time setup, then claims the
//! instance (serialization gate) and a limiter permit, then calls `process`
//! under a timeout of `min(policy timeout, time left before the deadline)`.
//! The permit is released before any backoff sleep.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use squadron_core::config::RetryConfig;
use squadron_core::job::{duration_millis, unix_millis};
use squadron_core::{
    AgentOutcome, AgentPolicy, AgentState, AttemptOutcome, ExecutionAttempt, FailureKind,
};

use super::limiter::{ConcurrencyLimiter, LimiterPermit};
use crate::agent::{AgentSlot, ExecutionGuard, SlotError};
use crate::task::Task;

/// Why a single attempt did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("{message}")]
    Failed { message: String },

    #[error("Setup failed: {message}")]
    Setup { message: String },

    #[error("Aborted: {reason}")]
    Aborted { reason: String },

    #[error("Agent is {state}")]
    NotReady { state: AgentState },
}

impl ExecutionError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Failed { .. } => FailureKind::Failed,
            Self::Setup { .. } => FailureKind::Setup,
            Self::Aborted { .. } => FailureKind::Aborted,
            Self::NotReady { .. } => FailureKind::NotReady,
        }
    }

    fn shutting_down() -> Self {
        Self::Aborted {
            reason: "runtime is shutting down".to_string(),
        }
    }
}

/// Effective retry/timeout policy for one (task, agent) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn from_config(retry: &RetryConfig, timeout: Duration) -> Self {
        Self {
            max_retries: retry.max_retries,
            backoff_base: Duration::from_millis(retry.backoff_base_ms),
            max_backoff: Duration::from_millis(retry.max_backoff_ms),
            timeout,
        }
    }

    /// Layer agent overrides, then the task's own retry override, on top.
    #[must_use]
    pub fn for_agent(&self, agent: &AgentPolicy, task_max_retries: Option<u32>) -> Self {
        Self {
            max_retries: task_max_retries
                .or(agent.max_retries)
                .unwrap_or(self.max_retries),
            backoff_base: agent
                .backoff_base_ms
                .map_or(self.backoff_base, Duration::from_millis),
            max_backoff: self.max_backoff,
            timeout: agent.timeout().unwrap_or(self.timeout),
        }
    }

    /// Delay after failed attempt `attempt` (zero-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Runtime-wide shutdown flags observed by supervisors.
///
/// `draining` stops new attempts and interrupts waits and backoffs;
/// `abort` additionally cancels attempts still running after the grace period.
#[derive(Debug, Clone)]
pub struct ShutdownSignals {
    draining: watch::Receiver<bool>,
    abort: watch::Receiver<bool>,
}

impl ShutdownSignals {
    pub const fn new(draining: watch::Receiver<bool>, abort: watch::Receiver<bool>) -> Self {
        Self { draining, abort }
    }

    /// Signals that never fire.
    pub fn never() -> Self {
        let (_, draining) = watch::channel(false);
        let (_, abort) = watch::channel(false);
        Self { draining, abort }
    }

    pub fn is_draining(&self) -> bool {
        *self.draining.borrow()
    }

    pub async fn draining(&self) {
        wait_flag(self.draining.clone()).await;
    }

    pub async fn aborted(&self) {
        wait_flag(self.abort.clone()).await;
    }
}

async fn wait_flag(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|set| *set).await.is_err() {
        // Sender gone without raising the flag: it never will.
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Attempting { attempt: u32, backoff: Duration },
    Backoff { attempt: u32, delay: Duration },
    Terminal,
}

/// Runs attempts for (task, agent) pairs against a shared limiter.
#[derive(Clone)]
pub struct ExecutionSupervisor {
    limiter: Arc<ConcurrencyLimiter>,
    signals: ShutdownSignals,
}

impl ExecutionSupervisor {
    pub const fn new(limiter: Arc<ConcurrencyLimiter>, signals: ShutdownSignals) -> Self {
        Self { limiter, signals }
    }

    /// Drive the pair to a terminal outcome.
    ///
    /// `admission` is a limiter permit already taken by the dispatcher; the
    /// first attempt uses it instead of acquiring a fresh one.
    pub async fn run(
        &self,
        slot: &AgentSlot,
        task: &Task,
        policy: &RetryPolicy,
        mut admission: Option<LimiterPermit>,
    ) -> AgentOutcome {
        let started = Instant::now();
        let mut history = Vec::new();
        let mut phase = Phase::Attempting {
            attempt: 0,
            backoff: Duration::ZERO,
        };

        loop {
            phase = match phase {
                Phase::Attempting { attempt, backoff } => {
                    let record = self
                        .attempt(slot, task, policy, &mut admission, attempt, backoff)
                        .await;
                    let next = self.next_phase(&record.outcome, attempt, policy, task);
                    history.push(record);
                    next
                }
                Phase::Backoff { attempt, delay } => {
                    debug!(
                        agent = %slot.name(),
                        task_id = %task.id,
                        attempt,
                        delay_ms = duration_millis(delay),
                        "Backing off before retry"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => Phase::Attempting {
                            attempt: attempt + 1,
                            backoff: delay,
                        },
                        () = self.signals.draining() => {
                            info!(
                                agent = %slot.name(),
                                task_id = %task.id,
                                "Retry cancelled by shutdown"
                            );
                            Phase::Terminal
                        }
                    }
                }
                Phase::Terminal => break,
            };
        }
        drop(admission);

        AgentOutcome::from_history(
            slot.name(),
            history,
            started.elapsed(),
            (FailureKind::Aborted, "runtime is shutting down".to_string()),
        )
    }

    fn next_phase(
        &self,
        outcome: &AttemptOutcome,
        attempt: u32,
        policy: &RetryPolicy,
        task: &Task,
    ) -> Phase {
        let AttemptOutcome::Failure { kind, .. } = outcome else {
            return Phase::Terminal;
        };
        if !kind.is_retryable() || attempt >= policy.max_retries || self.signals.is_draining() {
            return Phase::Terminal;
        }
        let delay = policy.delay_for(attempt);
        if task.remaining().is_some_and(|left| left <= delay) {
            debug!(task_id = %task.id, attempt, "Deadline leaves no room for another attempt");
            return Phase::Terminal;
        }
        Phase::Backoff { attempt, delay }
    }

    async fn attempt(
        &self,
        slot: &AgentSlot,
        task: &Task,
        policy: &RetryPolicy,
        admission: &mut Option<LimiterPermit>,
        attempt: u32,
        backoff: Duration,
    ) -> ExecutionAttempt {
        let started_at_ms = unix_millis();
        let clock = Instant::now();
        let result = self.execute(slot, task, policy, admission).await;
        let elapsed_ms = duration_millis(clock.elapsed());

        let outcome = match result {
            Ok(value) => {
                info!(
                    agent = %slot.name(),
                    task_id = %task.id,
                    attempt,
                    elapsed_ms,
                    outcome = "success",
                    "Attempt finished"
                );
                AttemptOutcome::Success { result: value }
            }
            Err(e) => {
                let kind = e.kind();
                warn!(
                    agent = %slot.name(),
                    task_id = %task.id,
                    attempt,
                    elapsed_ms,
                    outcome = ?kind,
                    error = %e,
                    "Attempt finished"
                );
                AttemptOutcome::Failure {
                    kind,
                    message: e.to_string(),
                }
            }
        };

        ExecutionAttempt {
            attempt,
            started_at_ms,
            ended_at_ms: unix_millis(),
            backoff_ms: duration_millis(backoff),
            outcome,
        }
    }

    async fn execute(
        &self,
        slot: &AgentSlot,
        task: &Task,
        policy: &RetryPolicy,
        admission: &mut Option<LimiterPermit>,
    ) -> Result<Value, ExecutionError> {
        if self.signals.is_draining() {
            return Err(ExecutionError::shutting_down());
        }

        slot.setup().await.map_err(|e| match e {
            SlotError::NotReady { state } => ExecutionError::NotReady { state },
            other => ExecutionError::Setup {
                message: other.to_string(),
            },
        })?;

        let mut claim = self.claim(slot, admission).await?;
        let limit = task
            .remaining()
            .map_or(policy.timeout, |left| left.min(policy.timeout));

        tokio::select! {
            result = tokio::time::timeout(limit, claim.guard.process(task)) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ExecutionError::Failed { message: e.to_string() }),
                Err(_) => Err(ExecutionError::Timeout { after_ms: duration_millis(limit) }),
            },
            () = self.signals.aborted() => Err(ExecutionError::Aborted {
                reason: "abandoned after shutdown grace period".to_string(),
            }),
        }
    }

    /// Wait for the instance, then take a permit and claim it.
    ///
    /// The permit is only taken once the instance looks free, and given back
    /// if another supervisor wins the claim, so waiters never pin permits
    /// while an instance is busy.
    async fn claim<'a>(
        &self,
        slot: &'a AgentSlot,
        admission: &mut Option<LimiterPermit>,
    ) -> Result<Claim<'a>, ExecutionError> {
        let _ticket = slot.wait_ticket();
        loop {
            let state = tokio::select! {
                state = slot.wait_until_available() => state,
                () = self.signals.draining() => return Err(ExecutionError::shutting_down()),
            };
            if state != AgentState::Ready {
                return Err(ExecutionError::NotReady { state });
            }

            let permit = match admission.take() {
                Some(permit) => permit,
                None => tokio::select! {
                    permit = self.limiter.acquire() => {
                        permit.map_err(|_| ExecutionError::shutting_down())?
                    }
                    () = self.signals.draining() => return Err(ExecutionError::shutting_down()),
                },
            };

            match slot.begin().await {
                Ok(guard) => {
                    return Ok(Claim {
                        guard,
                        _permit: permit,
                    });
                }
                Err(SlotError::Busy) => drop(permit),
                Err(SlotError::NotReady { state }) => {
                    return Err(ExecutionError::NotReady { state });
                }
                Err(SlotError::Agent(e)) => {
                    return Err(ExecutionError::Failed {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

/// A claimed instance plus the limiter permit it runs under.
///
/// Fields drop in declaration order: the instance is back to `Ready` before
/// the permit is released, so a new claim can never overlap this one.
struct Claim<'a> {
    guard: ExecutionGuard<'a>,
    _permit: LimiterPermit,
}
