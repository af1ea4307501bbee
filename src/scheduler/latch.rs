//! Latch for waiting until the indexer goes idle
//!
//! The latch starts out idle. Queueing work resets it; the worker triggers it once the
//! queue has drained, with the failure of the last task if that task failed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LatchError {
    #[error("Timeout waiting for the indexer to go idle")]
    Timeout,

    #[error("Indexing failed: {0}")]
    IndexingFailed(String),
}

#[derive(Debug)]
struct LatchState {
    idle: bool,
    /// Failure of the task that ran last before going idle
    error: Option<String>,
    waiters: usize,
}

impl Default for LatchState {
    fn default() -> Self {
        Self {
            idle: true,
            error: None,
            waiters: 0,
        }
    }
}

#[derive(Clone)]
pub struct IdleLatch {
    state: Arc<Mutex<LatchState>>,
    notify: Arc<Notify>,
}

impl IdleLatch {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LatchState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wait until the indexer is idle.
    ///
    /// Returns immediately when it already is. Fails with the last task's error if that
    /// task failed, or with [`LatchError::Timeout`].
    pub async fn wait(&self, timeout: Duration) -> Result<(), LatchError> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        {
            let mut state = self.state.lock().await;
            if state.idle {
                return Self::outcome(&state);
            }
            // registered before the lock is released, so a trigger cannot slip in between
            notified.as_mut().enable();
            state.waiters += 1;
            trace!("IdleLatch: waiter registered ({} waiting)", state.waiters);
        }

        let result = tokio::time::timeout(timeout, notified).await;

        let mut state = self.state.lock().await;
        state.waiters -= 1;
        match result {
            Ok(()) => Self::outcome(&state),
            Err(_) => {
                debug!("IdleLatch: timeout after {:?}", timeout);
                Err(LatchError::Timeout)
            }
        }
    }

    fn outcome(state: &LatchState) -> Result<(), LatchError> {
        match &state.error {
            Some(error) => Err(LatchError::IndexingFailed(error.clone())),
            None => Ok(()),
        }
    }

    /// Work was queued
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if state.idle {
            debug!("IdleLatch: busy");
        }
        state.idle = false;
        state.error = None;
    }

    pub async fn trigger_idle(&self) {
        self.trigger(None).await;
    }

    pub async fn trigger_failure(&self, error: String) {
        self.trigger(Some(error)).await;
    }

    async fn trigger(&self, error: Option<String>) {
        let mut state = self.state.lock().await;
        if state.idle {
            trace!("IdleLatch: already idle, ignoring trigger");
            return;
        }
        state.idle = true;
        state.error = error;
        debug!("IdleLatch: idle (failed: {})", state.error.is_some());
        self.notify.notify_waiters();
    }

    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.idle
    }

    pub async fn has_failed(&self) -> Option<String> {
        self.state.lock().await.error.clone()
    }

    pub async fn waiter_count(&self) -> usize {
        self.state.lock().await.waiters
    }
}

impl Default for IdleLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdleLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleLatch").finish()
    }
}
