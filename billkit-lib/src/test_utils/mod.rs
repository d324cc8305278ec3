//! Test utilities for billkit.
//!
//! This module provides:
//! - A scriptable in-memory billing provider that records every call
//! - A host stub with a controllable foreground activity
//! - Fixtures for products and purchases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billkit_lib::test_utils::{subscription_product, MockBillingProvider, MockHost};
//!
//! let provider = MockBillingProvider::new();
//! provider.set_products(vec![subscription_product("sub_pro", "$4.99", 4_990_000)]);
//! let engine = BillingEngine::new(provider.clone(), MockHost::new(), BillingConfig::default());
//! engine.initialize().await?;
//! ```

mod fixtures;
mod mock_provider;

pub use fixtures::{owned_purchase, product_without_offers, purchase, subscription_product};
pub use mock_provider::{MockBillingProvider, MockHost};

/// Yield to the scheduler until `condition` holds. Returns false if it never
/// does within a bounded number of yields.
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}
