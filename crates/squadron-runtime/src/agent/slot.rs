//! Lifecycle slot for one agent instance.
//!
//! The slot pairs the boxed agent with a `watch` channel carrying its
//! [`AgentState`]. All transitions are compare-and-set on that channel, so
//! exactly one caller can move an instance from `Ready` to `Executing`; the
//! winner holds an [`ExecutionGuard`] that puts the instance back to `Ready`
//! when dropped, including when the attempt future is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

use squadron_core::{AgentDescriptor, AgentState, AgentStatus};

use super::{AgentError, BoxedAgent};
use crate::task::Task;

/// Errors from slot transitions.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// Another supervisor holds the instance.
    #[error("Agent is busy")]
    Busy,

    #[error("Agent is {state}, not ready")]
    NotReady { state: AgentState },

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// One registered agent instance plus its lifecycle state.
pub struct AgentSlot {
    descriptor: Arc<AgentDescriptor>,
    agent: Mutex<BoxedAgent>,
    state: watch::Sender<AgentState>,
    waiting: AtomicUsize,
}

impl AgentSlot {
    pub fn new(descriptor: Arc<AgentDescriptor>, agent: BoxedAgent) -> Self {
        let (state, _) = watch::channel(AgentState::Uninitialized);
        Self {
            descriptor,
            agent: Mutex::new(agent),
            state,
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<AgentDescriptor> {
        &self.descriptor
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Supervisors currently waiting for this instance.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            name: self.descriptor.name.clone(),
            role: self.descriptor.role.clone(),
            category: self.descriptor.category.clone(),
            state: self.state(),
            queue_depth: self.queue_depth(),
        }
    }

    /// Run the agent's `setup` unless it already succeeded.
    ///
    /// Returns `Ok(true)` when setup ran now, `Ok(false)` when the instance
    /// was already initialized. A failed setup leaves it `Uninitialized`; a
    /// setup overtaken by `cleanup` is undone before returning `NotReady`.
    pub async fn setup(&self) -> Result<bool, SlotError> {
        let mut agent = self.agent.lock().await;
        match self.state() {
            AgentState::Uninitialized => {}
            AgentState::Ready | AgentState::Executing => return Ok(false),
            state => return Err(SlotError::NotReady { state }),
        }

        if let Err(e) = agent.setup().await {
            warn!(agent = %self.name(), error = %e, "Agent setup failed");
            return Err(e.into());
        }
        if !self.transition(AgentState::Uninitialized, AgentState::Ready) {
            // Shutdown started while setup ran and will skip this instance.
            let state = self.state();
            warn!(agent = %self.name(), %state, "Agent shut down during setup");
            if let Err(e) = agent.cleanup().await {
                warn!(agent = %self.name(), error = %e, "Agent cleanup failed");
            }
            return Err(SlotError::NotReady { state });
        }
        info!(agent = %self.name(), "Agent ready");
        Ok(true)
    }

    /// Wait until the instance is not `Executing` and return the state seen.
    pub async fn wait_until_available(&self) -> AgentState {
        let mut rx = self.state.subscribe();
        let observed = rx
            .wait_for(|s| *s != AgentState::Executing)
            .await
            .map(|s| *s);
        observed.unwrap_or_else(|_| self.state())
    }

    /// Register the caller as waiting for this instance until the ticket drops.
    pub fn wait_ticket(&self) -> WaitTicket<'_> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        WaitTicket { slot: self }
    }

    /// Claim the instance: `Ready -> Executing`.
    pub async fn begin(&self) -> Result<ExecutionGuard<'_>, SlotError> {
        let mut observed = AgentState::Ready;
        let won = self.state.send_if_modified(|s| {
            observed = *s;
            if *s == AgentState::Ready {
                *s = AgentState::Executing;
                true
            } else {
                false
            }
        });
        if !won {
            return Err(match observed {
                AgentState::Executing => SlotError::Busy,
                state => SlotError::NotReady { state },
            });
        }

        // Created before the lock await so a cancelled claim still resets.
        let release = ReleaseOnDrop { state: &self.state };
        let agent = self.agent.lock().await;
        debug!(agent = %self.name(), "Agent executing");
        Ok(ExecutionGuard {
            agent,
            _release: release,
        })
    }

    /// Shut the instance down: `* -> ShuttingDown -> Terminated`.
    ///
    /// Waits for any in-flight attempt to release the instance. Returns
    /// `Ok(true)` when the agent's `cleanup` ran, `Ok(false)` when there was
    /// nothing to clean (never set up, or already shut down).
    pub async fn cleanup(&self) -> Result<bool, SlotError> {
        let mut previous = AgentState::Uninitialized;
        let started = self.state.send_if_modified(|s| {
            previous = *s;
            if matches!(*s, AgentState::ShuttingDown | AgentState::Terminated) {
                false
            } else {
                *s = AgentState::ShuttingDown;
                true
            }
        });
        if !started {
            return Ok(false);
        }

        let mut agent = self.agent.lock().await;
        let result = if previous == AgentState::Uninitialized {
            Ok(false)
        } else {
            agent.cleanup().await.map(|()| true).map_err(SlotError::from)
        };
        drop(agent);

        self.state.send_replace(AgentState::Terminated);
        match &result {
            Ok(_) => info!(agent = %self.name(), "Agent terminated"),
            Err(e) => warn!(agent = %self.name(), error = %e, "Agent cleanup failed"),
        }
        result
    }

    fn transition(&self, from: AgentState, to: AgentState) -> bool {
        self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        })
    }
}

/// Exclusive access to an `Executing` instance.
pub struct ExecutionGuard<'a> {
    agent: MutexGuard<'a, BoxedAgent>,
    _release: ReleaseOnDrop<'a>,
}

impl ExecutionGuard<'_> {
    pub async fn process(&mut self, task: &Task) -> Result<Value, AgentError> {
        self.agent.process(task).await
    }
}

struct ReleaseOnDrop<'a> {
    state: &'a watch::Sender<AgentState>,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        // Shutdown may have moved the instance on; only undo our own claim.
        self.state.send_if_modified(|s| {
            if *s == AgentState::Executing {
                *s = AgentState::Ready;
                true
            } else {
                false
            }
        });
    }
}

/// Counts a supervisor in the slot's queue depth while alive.
pub struct WaitTicket<'a> {
    slot: &'a AgentSlot,
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.slot.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}
