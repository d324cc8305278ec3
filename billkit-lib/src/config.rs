//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::RetryPlan;
use crate::provider::ProductType;
use crate::{BillingError, Result};

/// Configuration for a [`crate::BillingEngine`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Reconnection attempts after the first failed connect.
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,

    /// Base backoff unit in milliseconds; attempt `n` waits `base * (n + 1)`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Product type used for catalog, purchase and restore queries.
    #[serde(default)]
    pub product_type: ProductType,
}

fn default_max_connect_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_connect_retries: default_max_connect_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            product_type: ProductType::default(),
        }
    }
}

impl BillingConfig {
    /// Parse a host-supplied JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BillingError::InitFailed(format!("invalid billing config: {}", e)))
    }

    /// Set the number of reconnection attempts.
    pub fn with_max_connect_retries(mut self, retries: u32) -> Self {
        self.max_connect_retries = retries;
        self
    }

    /// Set the backoff base unit.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the product type.
    pub fn with_product_type(mut self, product_type: ProductType) -> Self {
        self.product_type = product_type;
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Fresh retry plan for one connection attempt sequence.
    pub fn retry_plan(&self) -> RetryPlan {
        RetryPlan::new(self.max_connect_retries, self.retry_base_delay())
    }
}
