//! Shared mutable engine state.
//!
//! Connection state and the pending-purchase slot are touched from caller
//! tasks and from provider callbacks alike. One mutex guards all of it; the
//! lock is never held across an `.await`.
//!
//! # Thread Safety
//!
//! Lock poisoning is recovered from rather than propagated: every critical
//! section leaves the state consistent before it can panic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::correlator::PendingPurchaseRequest;
use crate::Result;

/// Lifecycle of the provider connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection; the next operation triggers a connect.
    Disconnected,
    /// An attempt sequence is in flight.
    Connecting,
    /// Connected and usable.
    Ready,
    /// The last attempt sequence ended in a terminal failure.
    Failed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        *self == Self::Ready
    }
}

pub(crate) struct EngineState {
    pub connection: ConnectionState,
    /// Set once `initialize` has succeeded.
    pub initialized: bool,
    /// Set by shutdown; terminal.
    pub destroyed: bool,
    /// Callers parked behind the in-flight attempt sequence.
    pub ready_waiters: Vec<oneshot::Sender<Result<()>>>,
    pub connect_task: Option<JoinHandle<()>>,
    pub pending: Option<PendingPurchaseRequest>,
    pub next_request_id: u64,
    /// Purchase tokens with an acknowledgment call in flight.
    pub acknowledging: HashSet<String>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            initialized: false,
            destroyed: false,
            ready_waiters: Vec::new(),
            connect_task: None,
            pending: None,
            next_request_id: 1,
            acknowledging: HashSet::new(),
        }
    }
}

/// Handle to the engine state, cloned into every component.
#[derive(Clone)]
pub(crate) struct SharedState(Arc<Mutex<EngineState>>);

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(EngineState::new())))
    }

    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
