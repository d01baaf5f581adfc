//! Semaphore-based limiter for concurrent agent executions.
//!
//! The [`ConcurrencyLimiter`] caps how many agent attempts run at once across
//! the whole runtime. Permits are issued via a Tokio semaphore; each permit
//! also updates the in-flight and peak counters reported in status snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Default maximum number of concurrent agent executions.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// A permit granting the right to run one agent attempt.
///
/// When dropped, the permit is automatically returned to the limiter.
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for LimiterPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterPermit").finish_non_exhaustive()
    }
}

/// Global concurrency limiter shared by every supervisor.
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Create a new limiter with the given concurrency limit.
    pub fn new(max_concurrency: usize) -> Self {
        let limit = if max_concurrency == 0 {
            DEFAULT_MAX_CONCURRENCY
        } else {
            max_concurrency
        };

        info!(max_concurrency = limit, "ConcurrencyLimiter created");

        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            max_concurrency: limit,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    /// Acquire a permit without waiting.
    ///
    /// Returns `None` if every permit is taken or the limiter is closed.
    pub fn try_acquire(&self) -> Option<LimiterPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.wrap(permit))
    }

    /// Acquire a permit, waiting until one becomes available.
    pub async fn acquire(&self) -> Result<LimiterPermit, LimiterError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)?;
        Ok(self.wrap(permit))
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> LimiterPermit {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        debug!(in_flight = now, "Limiter permit acquired");
        LimiterPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Close the limiter; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Maximum concurrency limit.
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of available permits remaining.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

/// Errors from the concurrency limiter.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The semaphore was closed (runtime shut down).
    #[error("Concurrency limiter has been closed")]
    Closed,
}
