//! Debouncer — last-write coalescing for burst recomputation requests.
//!
//! DESIGN
//! ======
//! A `Debouncer` holds at most one pending scheduled task. `schedule` aborts
//! whatever is pending and arms a fresh task that waits out the delay before
//! running. A burst of schedules inside one window therefore collapses into a
//! single execution of the most recently supplied future — there is no
//! explicit cancel operation, rescheduling IS the cancellation.
//!
//! Multi-token drags fire one `token:update` per token per tick; without
//! coalescing each would trigger a full scene resolve.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: Mutex::new(None) }
    }

    /// Arm `task` to run after the debounce delay, cancelling any pending task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(prev) = pending.take() {
            prev.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").field("delay", &self.delay).finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "debounce_test.rs"]
mod tests;
