//! Billkit Mobile Bridge
//!
//! Exposes the billing engine to a mobile host's plugin layer. Each host call
//! arrives with JSON arguments and a [`PluginCall`] to settle; operations run
//! on an owned Tokio runtime and settle the call with a JSON payload or a
//! `{code, message}` rejection.
//!
//! # Thread Safety
//!
//! [`BillingPlugin`] methods return immediately and may be called from any
//! host thread except Tokio worker threads.

pub mod async_bridge;
pub mod logging;

pub use async_bridge::{AsyncRuntime, CallSettler, FnCall, PluginCall};
pub use logging::{init_logging, DEFAULT_LOG_FILTER};

use std::sync::Arc;

use billkit_lib::{BillingConfig, BillingEngine, BillingError, BillingProvider, HostActivity};
use serde_json::{json, Value};
use tracing::info;

/// Bridge setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MobileError {
    /// The async runtime could not be created.
    #[error("Runtime error: {msg}")]
    Runtime { msg: String },

    /// The log filter could not be parsed.
    #[error("Logging error: {msg}")]
    Logging { msg: String },

    /// The host-supplied configuration was rejected.
    #[error("Configuration error: {msg}")]
    Config { msg: String },
}

/// Argument keys accepted from the host.
pub mod keys {
    pub const PRODUCT_IDS: &str = "product_ids";
    pub const PRODUCT_ID: &str = "product_id";
    pub const EMAIL_ADDRESS: &str = "email_address";
    pub const PURCHASE_TOKEN: &str = "purchase_token";
}

fn required_str(args: &Value, key: &str) -> Result<String, BillingError> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(BillingError::missing_param(key)),
    }
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_str_list(args: &Value, key: &str) -> Result<Vec<String>, BillingError> {
    let values: Vec<String> = args
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if values.is_empty() {
        return Err(BillingError::missing_param(key));
    }
    Ok(values)
}

/// Host-facing billing plugin.
pub struct BillingPlugin {
    runtime: AsyncRuntime,
    engine: Arc<BillingEngine>,
}

impl BillingPlugin {
    /// Create a plugin with its own runtime.
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        host: Arc<dyn HostActivity>,
        config: BillingConfig,
    ) -> Result<Self, MobileError> {
        Ok(Self {
            runtime: AsyncRuntime::new()?,
            engine: Arc::new(BillingEngine::new(provider, host, config)),
        })
    }

    /// Create a plugin from a host-supplied JSON configuration.
    pub fn from_json_config(
        provider: Arc<dyn BillingProvider>,
        host: Arc<dyn HostActivity>,
        config_json: &str,
    ) -> Result<Self, MobileError> {
        let config = BillingConfig::from_json(config_json).map_err(|e| MobileError::Config {
            msg: e.message(),
        })?;
        Self::new(provider, host, config)
    }

    pub fn engine(&self) -> &Arc<BillingEngine> {
        &self.engine
    }

    pub fn initialize(&self, call: Arc<dyn PluginCall>) {
        let engine = self.engine.clone();
        self.runtime.spawn_call(
            async move {
                engine.initialize().await?;
                Ok(json!({}))
            },
            CallSettler::new(call),
        );
    }

    /// Args: `product_ids`. Resolves `{products}`.
    pub fn query_product_details(&self, args: &Value, call: Arc<dyn PluginCall>) {
        let settler = CallSettler::new(call);
        let ids = match required_str_list(args, keys::PRODUCT_IDS) {
            Ok(ids) => ids,
            Err(e) => {
                settler.reject(&e);
                return;
            }
        };

        let engine = self.engine.clone();
        self.runtime.spawn_call(
            async move {
                let products = engine.query_products(ids.as_slice()).await?;
                Ok(json!({ "products": products }))
            },
            settler,
        );
    }

    /// Args: `product_id`, optional `email_address`. Resolves
    /// `{purchase_token, product_id, order_id, pending}`.
    pub fn start_purchase(&self, args: &Value, call: Arc<dyn PluginCall>) {
        let settler = CallSettler::new(call);
        let product_id = match required_str(args, keys::PRODUCT_ID) {
            Ok(id) => id,
            Err(e) => {
                settler.reject(&e);
                return;
            }
        };
        let account = optional_str(args, keys::EMAIL_ADDRESS);

        let engine = self.engine.clone();
        self.runtime.spawn_call(
            async move {
                let outcome = engine
                    .start_purchase(&product_id, account.as_deref())
                    .await?;
                Ok(json!(outcome))
            },
            settler,
        );
    }

    /// Args: optional `email_address`. Resolves `{purchases}`.
    pub fn query_purchases(&self, args: &Value, call: Arc<dyn PluginCall>) {
        let account = optional_str(args, keys::EMAIL_ADDRESS);
        let engine = self.engine.clone();
        self.runtime.spawn_call(
            async move {
                let purchases = engine.query_purchases(account.as_deref()).await?;
                Ok(json!({ "purchases": purchases }))
            },
            CallSettler::new(call),
        );
    }

    /// Args: `purchase_token`. Resolves `{}`.
    pub fn acknowledge_purchase(&self, args: &Value, call: Arc<dyn PluginCall>) {
        let settler = CallSettler::new(call);
        let token = match required_str(args, keys::PURCHASE_TOKEN) {
            Ok(token) => token,
            Err(e) => {
                settler.reject(&e);
                return;
            }
        };

        let engine = self.engine.clone();
        self.runtime.spawn_call(
            async move {
                engine.acknowledge_purchase(&token).await?;
                Ok(json!({}))
            },
            settler,
        );
    }

    /// Args: `product_id`, optional `email_address`. Resolves
    /// `{active, purchase}`.
    pub fn check_subscription(&self, args: &Value, call: Arc<dyn PluginCall>) {
        let settler = CallSettler::new(call);
        let product_id = match required_str(args, keys::PRODUCT_ID) {
            Ok(id) => id,
            Err(e) => {
                settler.reject(&e);
                return;
            }
        };
        let account = optional_str(args, keys::EMAIL_ADDRESS);

        let engine = self.engine.clone();
        self.runtime.spawn_call(
            async move {
                let status = engine
                    .check_subscription(&product_id, account.as_deref())
                    .await?;
                Ok(json!(status))
            },
            settler,
        );
    }

    /// Host teardown. Blocks until the engine has shut down.
    pub fn on_destroy(&self) {
        let engine = self.engine.clone();
        self.runtime.block_on(async move { engine.shutdown().await });
        info!("billing plugin destroyed");
    }
}
