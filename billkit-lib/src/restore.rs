//! Account-scoped purchase restoration.
//!
//! Restored purchases are filtered to those tagged with the caller's
//! ownership token, narrowed to completed purchases, and enriched with
//! catalog pricing. A purchase whose catalog entry is missing or carries no
//! usable offer is dropped rather than returned with partial data.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::ProductCatalogService;
use crate::ownership::hash_account_id;
use crate::provider::{BillingProvider, ProductDetails, ProductType, Purchase, PurchaseState};
use crate::{BillingError, Result};

/// A restored purchase merged with its product's primary listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedPurchase {
    pub purchase_token: String,
    pub product_id: String,
    pub order_id: Option<String>,
    pub purchase_state: PurchaseState,
    pub acknowledged: bool,
    /// Milliseconds since the epoch.
    pub purchase_time: i64,
    pub title: String,
    pub description: String,
    pub formatted_price: String,
    pub price_micros: i64,
    pub currency_code: String,
}

impl EnrichedPurchase {
    /// Merge a purchase with catalog details. `None` when the product has no
    /// offer with a pricing phase.
    pub fn enrich(purchase: &Purchase, details: &ProductDetails) -> Option<Self> {
        let (_, phase) = details.primary_offer()?;
        Some(Self {
            purchase_token: purchase.purchase_token.clone(),
            product_id: purchase.product_id().to_string(),
            order_id: purchase.order_id.clone(),
            purchase_state: purchase.state,
            acknowledged: purchase.acknowledged,
            purchase_time: purchase.purchase_time,
            title: details.title.clone(),
            description: details.description.clone(),
            formatted_price: phase.formatted_price.clone(),
            price_micros: phase.price_amount_micros,
            currency_code: phase.price_currency_code.clone(),
        })
    }

    /// Purchase time as a UTC timestamp.
    pub fn purchased_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.purchase_time)
    }
}

/// Entitlement summary for one product.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub active: bool,
    pub purchase: Option<EnrichedPurchase>,
}

impl SubscriptionStatus {
    /// Status derived from restored purchases: active when any completed
    /// purchase covers `product_id`.
    pub fn from_purchases(product_id: &str, purchases: Vec<EnrichedPurchase>) -> Self {
        let purchase = purchases
            .into_iter()
            .find(|p| p.product_id == product_id && p.purchase_state == PurchaseState::Purchased);
        Self {
            active: purchase.is_some(),
            purchase,
        }
    }
}

/// Restores the purchases owned by one account.
#[derive(Clone)]
pub struct RestoreService {
    provider: Arc<dyn BillingProvider>,
    catalog: ProductCatalogService,
    product_type: ProductType,
}

impl RestoreService {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        catalog: ProductCatalogService,
        product_type: ProductType,
    ) -> Self {
        Self {
            provider,
            catalog,
            product_type,
        }
    }

    /// Completed purchases owned by `account`, enriched with catalog data, in
    /// provider order.
    ///
    /// An empty or blank account yields an empty list without any provider
    /// call.
    pub async fn restore(&self, account: &str) -> Result<Vec<EnrichedPurchase>> {
        let Some(owner) = hash_account_id(account) else {
            debug!("restore without account scope; returning nothing");
            return Ok(Vec::new());
        };

        let (result, purchases) = self.provider.query_purchases(self.product_type).await;
        if !result.is_ok() {
            warn!(code = %result.code, "purchase query failed: {}", result.debug_message);
            return Err(BillingError::provider(&result));
        }
        let total = purchases.len();

        let owned: Vec<Purchase> = purchases
            .into_iter()
            .filter(|p| owner.owns(p.obfuscated_account_id.as_deref()))
            .filter(|p| p.state == PurchaseState::Purchased)
            .collect();
        debug!(total, owned = owned.len(), "filtered restored purchases");

        if owned.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = owned.iter().map(Purchase::product_id).collect();
        let details = self.catalog.fetch_details(ids.as_slice()).await?;
        let by_id: HashMap<&str, &ProductDetails> = details
            .iter()
            .map(|d| (d.product_id.as_str(), d))
            .collect();

        let mut restored = Vec::with_capacity(owned.len());
        for purchase in &owned {
            let Some(details) = by_id.get(purchase.product_id()) else {
                warn!(
                    product_id = purchase.product_id(),
                    purchase_token = %purchase.purchase_token,
                    "dropping restored purchase: product not in catalog"
                );
                continue;
            };
            match EnrichedPurchase::enrich(purchase, details) {
                Some(enriched) => restored.push(enriched),
                None => warn!(
                    product_id = purchase.product_id(),
                    purchase_token = %purchase.purchase_token,
                    "dropping restored purchase: product has no usable offer"
                ),
            }
        }

        Ok(restored)
    }
}
