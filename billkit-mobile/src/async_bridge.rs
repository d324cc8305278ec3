//! Async Bridge for Mobile Platforms
//!
//! Host plugin frameworks hand every call to native code as a call object that
//! must later be resolved or rejected exactly once. This module bridges Rust
//! futures onto that model.
//!
//! # Example
//!
//! ```ignore
//! let runtime = AsyncRuntime::new()?;
//! let settler = CallSettler::new(call);
//! runtime.spawn_call(async { Ok(serde_json::json!({})) }, settler);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use billkit_lib::BillingError;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::MobileError;

/// A pending call from the host, implemented by host glue code.
pub trait PluginCall: Send + Sync {
    /// Complete the call with a JSON payload.
    fn resolve(&self, data: Value);
    /// Fail the call with a stable code and a human-readable message.
    fn reject(&self, code: &str, message: &str);
}

/// Guards a [`PluginCall`] so it is settled at most once.
#[derive(Clone)]
pub struct CallSettler {
    call: Arc<dyn PluginCall>,
    settled: Arc<AtomicBool>,
}

impl CallSettler {
    pub fn new(call: Arc<dyn PluginCall>) -> Self {
        Self {
            call,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }

    /// Resolve the call. Returns false if it was already settled.
    pub fn resolve(&self, data: Value) -> bool {
        if !self.claim() {
            debug!("ignoring resolve of settled call");
            return false;
        }
        self.call.resolve(data);
        true
    }

    /// Reject the call with the error's code and message. Returns false if it
    /// was already settled.
    pub fn reject(&self, error: &BillingError) -> bool {
        if !self.claim() {
            debug!(code = error.code(), "ignoring reject of settled call");
            return false;
        }
        self.call.reject(error.code(), &error.message());
        true
    }

    pub fn settle(&self, outcome: Result<Value, BillingError>) -> bool {
        match outcome {
            Ok(data) => self.resolve(data),
            Err(e) => self.reject(&e),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

/// Async runtime wrapper for mobile.
///
/// Owns the Tokio runtime that engine operations run on.
pub struct AsyncRuntime {
    runtime: tokio::runtime::Runtime,
}

impl AsyncRuntime {
    /// Create a new multi-threaded runtime.
    pub fn new() -> Result<Self, MobileError> {
        tokio::runtime::Runtime::new()
            .map(|runtime| Self { runtime })
            .map_err(|e| MobileError::Runtime {
                msg: format!("Failed to create runtime: {}", e),
            })
    }

    /// Run a future to completion on the current thread.
    ///
    /// # Panics
    ///
    /// Panics if called from within a Tokio runtime context. Call it from host
    /// threads only.
    pub fn block_on<F, T>(&self, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.runtime.block_on(future)
    }

    /// Run `future` in the background and settle `call` with its outcome.
    pub fn spawn_call<F>(&self, future: F, call: CallSettler) -> JoinHandle<()>
    where
        F: std::future::Future<Output = Result<Value, BillingError>> + Send + 'static,
    {
        self.runtime.spawn(async move {
            call.settle(future.await);
        })
    }
}

/// Closure-backed [`PluginCall`].
#[derive(Clone)]
pub struct FnCall {
    resolve_fn: Arc<dyn Fn(Value) + Send + Sync>,
    reject_fn: Arc<dyn Fn(&str, &str) + Send + Sync>,
}

impl FnCall {
    pub fn new<R, E>(resolve_fn: R, reject_fn: E) -> Arc<Self>
    where
        R: Fn(Value) + Send + Sync + 'static,
        E: Fn(&str, &str) + Send + Sync + 'static,
    {
        Arc::new(Self {
            resolve_fn: Arc::new(resolve_fn),
            reject_fn: Arc::new(reject_fn),
        })
    }
}

impl PluginCall for FnCall {
    fn resolve(&self, data: Value) {
        (self.resolve_fn)(data);
    }

    fn reject(&self, code: &str, message: &str) {
        (self.reject_fn)(code, message);
    }
}
