//! Product and purchase fixtures.

use crate::provider::{PricingPhase, ProductDetails, Purchase, PurchaseState, SubscriptionOffer};

/// Fixed purchase time: 2023-11-14T22:13:20Z.
const PURCHASE_TIME_MS: i64 = 1_700_000_000_000;

/// Subscription with one offer (`"<id>-offer"`) and one USD pricing phase.
pub fn subscription_product(product_id: &str, formatted_price: &str, micros: i64) -> ProductDetails {
    ProductDetails {
        product_id: product_id.to_string(),
        title: format!("{} subscription", product_id),
        description: format!("Monthly {} plan", product_id),
        subscription_offers: vec![SubscriptionOffer {
            offer_token: format!("{}-offer", product_id),
            pricing_phases: vec![PricingPhase {
                formatted_price: formatted_price.to_string(),
                price_amount_micros: micros,
                price_currency_code: "USD".to_string(),
            }],
        }],
    }
}

/// Product with metadata only.
pub fn product_without_offers(product_id: &str) -> ProductDetails {
    ProductDetails {
        product_id: product_id.to_string(),
        title: format!("{} (legacy)", product_id),
        description: "One-time unlock".to_string(),
        subscription_offers: Vec::new(),
    }
}

/// Untagged purchase with order id `"O-<token>"`.
pub fn purchase(
    purchase_token: &str,
    product_id: &str,
    state: PurchaseState,
    acknowledged: bool,
) -> Purchase {
    Purchase {
        purchase_token: purchase_token.to_string(),
        products: vec![product_id.to_string()],
        order_id: Some(format!("O-{}", purchase_token)),
        state,
        acknowledged,
        purchase_time: PURCHASE_TIME_MS,
        obfuscated_account_id: None,
    }
}

/// Completed, acknowledged purchase tagged with `owner`.
pub fn owned_purchase(purchase_token: &str, product_id: &str, owner: &str) -> Purchase {
    Purchase {
        obfuscated_account_id: Some(owner.to_string()),
        ..purchase(purchase_token, product_id, PurchaseState::Purchased, true)
    }
}
