//! Background retry loop for modules whose `start()` failed.
//!
//! A [`RetryStart`] is created exactly when a start call fails and runs on
//! its own task so it never blocks the rest of the graph. It re-attempts
//! the module's `start()` every `retry_interval` while the process-wide
//! run flag is set, and is destroyed on success, on exhausting its attempt
//! budget, or on explicit cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::module::SharedModule;

/// Lifecycle of one retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    /// Attempting; the only non-terminal state.
    Running,
    /// `start()` succeeded; the loop self-deregistered.
    Succeeded,
    /// The attempt counter reached `max_attempts`.
    ExhaustedAttempts,
    /// Externally cancelled (module removed, graph stopped, run flag
    /// cleared).
    Stopped,
}

impl RetryState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Construction errors for [`RetryStart`].
#[derive(Debug, Error, Diagnostic)]
pub enum RetryError {
    #[error("retry interval must be greater than zero")]
    #[diagnostic(code(metricloom::retry::zero_interval))]
    ZeroInterval,
}

/// The set of currently-active retry loops, keyed by module id. Loops
/// remove themselves on reaching a terminal state.
pub type ActiveRetries = Arc<Mutex<FxHashMap<String, Arc<RetryStart>>>>;

/// One background start-retry loop.
pub struct RetryStart {
    module_id: String,
    state: Mutex<RetryState>,
    attempts: AtomicU32,
    cancel: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryStart {
    /// Spawn a retry loop for the given module.
    ///
    /// `retry_interval` must be non-zero. `max_attempts = None` retries
    /// unbounded. `run` is the process-wide run flag polled cooperatively;
    /// `started` is flipped on success so the module's worker can proceed.
    /// The loop registers itself in `registry` and deregisters on any
    /// terminal state.
    pub fn spawn(
        module_id: impl Into<String>,
        module: SharedModule,
        retry_interval: Duration,
        max_attempts: Option<u32>,
        run: watch::Receiver<bool>,
        started: watch::Sender<bool>,
        registry: ActiveRetries,
    ) -> Result<Arc<Self>, RetryError> {
        if retry_interval.is_zero() {
            return Err(RetryError::ZeroInterval);
        }
        let module_id = module_id.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let retry = Arc::new(Self {
            module_id: module_id.clone(),
            state: Mutex::new(RetryState::Running),
            attempts: AtomicU32::new(0),
            cancel: cancel_tx,
            handle: Mutex::new(None),
        });
        registry.lock().insert(module_id.clone(), retry.clone());

        let loop_retry = retry.clone();
        let handle = tokio::spawn(async move {
            loop_retry
                .run_loop(
                    module,
                    retry_interval,
                    max_attempts,
                    run,
                    cancel_rx,
                    started,
                    registry,
                )
                .await;
        });
        *retry.handle.lock() = Some(handle);
        Ok(retry)
    }

    async fn run_loop(
        self: Arc<Self>,
        module: SharedModule,
        retry_interval: Duration,
        max_attempts: Option<u32>,
        run: watch::Receiver<bool>,
        mut cancel: watch::Receiver<bool>,
        started: watch::Sender<bool>,
        registry: ActiveRetries,
    ) {
        let final_state = loop {
            if *cancel.borrow() || !*run.borrow() {
                break RetryState::Stopped;
            }

            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let result = module.lock().await.start().await;
            match result {
                Ok(()) => break RetryState::Succeeded,
                Err(error) => {
                    tracing::warn!(
                        module = %self.module_id,
                        attempt,
                        %error,
                        "start attempt failed"
                    );
                }
            }

            if let Some(budget) = max_attempts
                && attempt >= budget
            {
                tracing::warn!(
                    module = %self.module_id,
                    attempts = attempt,
                    "start retries exhausted"
                );
                break RetryState::ExhaustedAttempts;
            }

            tokio::select! {
                _ = cancel.changed() => {}
                _ = tokio::time::sleep(retry_interval) => {}
            }
        };

        *self.state.lock() = final_state;
        registry.lock().remove(&self.module_id);
        if final_state == RetryState::Succeeded {
            tracing::info!(module = %self.module_id, "start succeeded after retry");
            started.send_replace(true);
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RetryState {
        *self.state.lock()
    }

    /// Number of `start()` attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Id of the module this loop is starting.
    #[must_use]
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Cancel the loop and wait for its task to finish.
    pub async fn stop(&self) {
        let _ = self.cancel.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
