//! Product catalog lookup.
//!
//! Products are never cached: every lookup is one fresh, batched provider
//! query. Multi-offer and multi-phase subscriptions are reduced to their first
//! offer's first pricing phase.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{BillingProvider, ProductDetails, ProductQuery, ProductType};
use crate::{BillingError, Result};

/// Normalized product listing.
///
/// Pricing fields are absent for products without a subscription offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_micros: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
}

impl ProductRecord {
    /// Build a record from provider details using the primary listing.
    pub fn from_details(details: &ProductDetails) -> Self {
        let phase = details.primary_offer().map(|(_, phase)| phase);
        Self {
            product_id: details.product_id.clone(),
            title: details.title.clone(),
            description: details.description.clone(),
            formatted_price: phase.map(|p| p.formatted_price.clone()),
            price_micros: phase.map(|p| p.price_amount_micros),
            currency_code: phase.map(|p| p.price_currency_code.clone()),
        }
    }

    pub fn has_pricing(&self) -> bool {
        self.formatted_price.is_some()
    }
}

/// Validate caller-supplied product ids: drop blanks and duplicates, keep
/// order, and fail with `MISSING_PARAM` if nothing is left.
pub fn normalize_product_ids<S: AsRef<str>>(ids: &[S]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = ids
        .iter()
        .map(|id| id.as_ref().trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Err(BillingError::missing_param("product_ids"));
    }
    Ok(ids)
}

/// Provider-backed product metadata service.
#[derive(Clone)]
pub struct ProductCatalogService {
    provider: Arc<dyn BillingProvider>,
    product_type: ProductType,
}

impl ProductCatalogService {
    pub fn new(provider: Arc<dyn BillingProvider>, product_type: ProductType) -> Self {
        Self {
            provider,
            product_type,
        }
    }

    /// Raw provider details for the given products, in one batched query.
    pub async fn fetch_details<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<ProductDetails>> {
        let queries: Vec<ProductQuery> = normalize_product_ids(ids)?
            .into_iter()
            .map(|id| ProductQuery::new(id, self.product_type))
            .collect();

        debug!(count = queries.len(), "querying product details");
        let (result, details) = self.provider.query_product_details(queries).await;
        if !result.is_ok() {
            warn!(code = %result.code, "product query failed: {}", result.debug_message);
            return Err(BillingError::provider(&result));
        }

        debug!(count = details.len(), "product details received");
        Ok(details)
    }

    /// Product records for the given ids.
    pub async fn query_products<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<ProductRecord>> {
        let details = self.fetch_details(ids).await?;
        Ok(details
            .iter()
            .map(|d| {
                if d.primary_offer().is_none() {
                    debug!(product_id = %d.product_id, "product has no subscription offer");
                }
                ProductRecord::from_details(d)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BillingResult, ResponseCode};
    use crate::test_utils::{product_without_offers, subscription_product, MockBillingProvider};

    #[test]
    fn test_normalize_product_ids() {
        let ids = normalize_product_ids(&["a", " b ", "", "a"]).unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let err = normalize_product_ids::<&str>(&[]).unwrap_err();
        assert_eq!(err.code(), "MISSING_PARAM");
        assert!(normalize_product_ids(&["  "]).is_err());
    }

    #[tokio::test]
    async fn test_query_maps_primary_listing() {
        let provider = MockBillingProvider::new();
        provider.set_products(vec![
            subscription_product("sub_pro", "$4.99", 4_990_000),
            product_without_offers("legacy_item"),
        ]);
        let catalog = ProductCatalogService::new(provider.clone(), ProductType::Subs);

        let records = catalog
            .query_products(&["sub_pro", "legacy_item"])
            .await
            .unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].formatted_price.as_deref(), Some("$4.99"));
        assert_eq!(records[0].price_micros, Some(4_990_000));
        assert_eq!(records[0].currency_code.as_deref(), Some("USD"));

        assert_eq!(records[1].product_id, "legacy_item");
        assert!(!records[1].has_pricing());
        assert!(records[1].price_micros.is_none());

        let queries = provider.product_queries();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].iter().all(|q| q.product_type == ProductType::Subs));
    }

    #[test]
    fn test_record_without_offer_omits_pricing_in_json() {
        let record = ProductRecord::from_details(&product_without_offers("legacy_item"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["product_id"], "legacy_item");
        assert!(json.get("formatted_price").is_none());
        assert!(json.get("price_micros").is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_passes_through() {
        let provider = MockBillingProvider::new();
        provider.set_product_result(BillingResult::new(
            ResponseCode::DeveloperError,
            "unknown product type",
        ));
        let catalog = ProductCatalogService::new(provider, ProductType::Subs);

        let err = catalog.query_products(&["sub_pro"]).await.unwrap_err();
        assert_eq!(err.code(), "DEVELOPER_ERROR");
        assert_eq!(err.message(), "unknown product type");
    }
}
