//! Billkit library.
//!
//! Purchase orchestration on top of a callback-driven app-store billing
//! provider. The provider reports purchase outcomes out-of-band on a shared
//! connection; this crate keeps that connection healthy and correlates each
//! pushed outcome back to the caller that started the purchase.
//!
//! # Features
//!
//! - **Connection lifecycle**: one shared connection, linear-backoff reconnects, readiness gate
//! - **Purchase correlation**: a single pending slot with supersession
//! - **Reconciliation**: settles purchases from provider pushes and acknowledges them once
//! - **Restore**: account-scoped restoration via hashed ownership tokens
//!
//! # Example
//!
//! ```ignore
//! use billkit_lib::{BillingConfig, BillingEngine};
//!
//! let engine = BillingEngine::new(provider, host, BillingConfig::default());
//! engine.initialize().await?;
//!
//! let products = engine.query_products(&["sub_pro"]).await?;
//! let outcome = engine.start_purchase("sub_pro", Some("user@example.com")).await?;
//! assert!(!outcome.purchase_token.is_empty());
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod engine;
pub mod errors;
pub mod ownership;
pub mod provider;
pub mod reconciler;
pub mod restore;
mod state;

/// Scriptable provider, host stub and fixtures.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use catalog::{ProductCatalogService, ProductRecord};
pub use config::BillingConfig;
pub use connection::{ConnectionManager, RetryPlan};
pub use correlator::{PurchaseCorrelator, PurchaseOutcome, PurchaseTicket};
pub use engine::BillingEngine;
pub use errors::BillingError;
pub use ownership::{hash_account_id, OwnershipToken};
pub use provider::{
    ActivityHandle, BillingProvider, BillingResult, HostActivity, ProductType, ProviderEvent,
    ProviderEventSender, Purchase, PurchaseState, ResponseCode,
};
pub use reconciler::PurchaseReconciler;
pub use restore::{EnrichedPurchase, RestoreService, SubscriptionStatus};
pub use state::ConnectionState;

/// Common result alias for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;
