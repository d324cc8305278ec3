//! Provider connection lifecycle.
//!
//! [`ConnectionManager`] owns the single provider connection. Callers gate on
//! [`ConnectionManager::ensure_ready`]; when the connection is down the first
//! caller starts an attempt sequence in a background task and every caller
//! (the first included) parks on a oneshot until the sequence reaches a
//! terminal outcome. At most one sequence is in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::BillingConfig;
use crate::provider::{BillingProvider, ProviderEventSender};
use crate::state::{ConnectionState, SharedState};
use crate::{BillingError, Result};

/// Linear backoff schedule for one connection attempt sequence.
///
/// Retry `n` (zero-based) waits `base_delay * (n + 1)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPlan {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPlan {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
        }
    }

    /// Retries scheduled so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self
            .base_delay
            .checked_mul(self.attempt + 1)
            .unwrap_or(Duration::MAX);
        self.attempt += 1;
        Some(delay)
    }
}

/// Settles parked callers when an attempt sequence is dropped without an
/// outcome, e.g. after a panic inside the provider.
struct SequenceGuard {
    manager: Option<ConnectionManager>,
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            warn!("billing connection attempt ended without an outcome");
            manager.finish(Err(BillingError::ConnectionFailed {
                message: "connection attempt ended unexpectedly".to_string(),
            }));
        }
    }
}

/// Owns the provider connection and its readiness gate.
#[derive(Clone)]
pub struct ConnectionManager {
    provider: Arc<dyn BillingProvider>,
    shared: SharedState,
    config: BillingConfig,
    events: ProviderEventSender,
}

impl ConnectionManager {
    pub(crate) fn new(
        provider: Arc<dyn BillingProvider>,
        shared: SharedState,
        config: BillingConfig,
        events: ProviderEventSender,
    ) -> Self {
        Self {
            provider,
            shared,
            config,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    /// Resolve once the connection is ready.
    ///
    /// Returns immediately when already connected. Otherwise joins (or starts)
    /// the attempt sequence and returns its terminal outcome.
    pub async fn ensure_ready(&self) -> Result<()> {
        let waiter = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return Err(BillingError::Destroyed);
            }

            match state.connection {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Connecting => {
                    let (tx, rx) = oneshot::channel();
                    state.ready_waiters.push(tx);
                    rx
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    let (tx, rx) = oneshot::channel();
                    state.ready_waiters.push(tx);
                    state.connection = ConnectionState::Connecting;

                    let sequence = self.clone();
                    state.connect_task = Some(tokio::spawn(sequence.run_attempts()));
                    rx
                }
            }
        };

        waiter.await.unwrap_or(Err(BillingError::Destroyed))
    }

    async fn run_attempts(self) {
        let mut guard = SequenceGuard {
            manager: Some(self.clone()),
        };
        let outcome = self.connect_with_retry().await;
        guard.manager = None;
        self.finish(outcome);
    }

    async fn connect_with_retry(&self) -> Result<()> {
        let mut plan = self.config.retry_plan();

        loop {
            debug!(retry = plan.attempt(), "connecting to billing provider");
            let result = self.provider.start_connection(self.events.clone()).await;

            if result.is_ok() {
                info!("billing provider connected");
                return Ok(());
            }

            if result.code.is_retryable() {
                if let Some(delay) = plan.next_delay() {
                    warn!(
                        code = %result.code,
                        retry = plan.attempt(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "billing connection failed, retrying: {}",
                        result.debug_message
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            warn!(
                code = %result.code,
                retries = plan.attempt(),
                "billing connection failed: {}",
                result.debug_message
            );
            let message = if result.debug_message.is_empty() {
                result.code.as_str().to_string()
            } else {
                result.debug_message
            };
            return Err(BillingError::ConnectionFailed { message });
        }
    }

    fn finish(&self, outcome: Result<()>) {
        let waiters = {
            let mut state = self.shared.lock();
            state.connect_task = None;
            if state.destroyed {
                return;
            }
            state.connection = if outcome.is_ok() {
                ConnectionState::Ready
            } else {
                ConnectionState::Failed
            };
            std::mem::take(&mut state.ready_waiters)
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Provider-initiated disconnect. Leaves the connection down for the next
    /// operation to re-establish; does not retry on its own.
    pub fn on_disconnected(&self) {
        let mut state = self.shared.lock();
        if state.connection == ConnectionState::Ready {
            state.connection = ConnectionState::Disconnected;
        }
        warn!(state = ?state.connection, "billing service disconnected");
    }

    /// Abort any attempt sequence, fail parked callers and release the
    /// connection.
    pub async fn shutdown(&self) {
        let (task, waiters) = {
            let mut state = self.shared.lock();
            state.destroyed = true;
            state.connection = ConnectionState::Disconnected;
            (
                state.connect_task.take(),
                std::mem::take(&mut state.ready_waiters),
            )
        };

        if let Some(task) = task {
            task.abort();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(BillingError::Destroyed));
        }

        self.provider.end_connection().await;
        info!("billing connection released");
    }
}
