//! Purchase-update reconciliation.
//!
//! Driven entirely by provider push events. Each batch settles the pending
//! purchase request, if any, and schedules acknowledgment for completed but
//! unacknowledged purchases.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::correlator::{PurchaseCorrelator, PurchaseOutcome};
use crate::provider::{BillingProvider, BillingResult, Purchase, PurchaseState, ResponseCode};
use crate::state::SharedState;
use crate::BillingError;

/// Consumes purchase-update batches from the provider.
#[derive(Clone)]
pub struct PurchaseReconciler {
    provider: Arc<dyn BillingProvider>,
    correlator: PurchaseCorrelator,
    shared: SharedState,
}

impl PurchaseReconciler {
    pub(crate) fn new(
        provider: Arc<dyn BillingProvider>,
        correlator: PurchaseCorrelator,
        shared: SharedState,
    ) -> Self {
        Self {
            provider,
            correlator,
            shared,
        }
    }

    /// Handle one purchase-update batch.
    ///
    /// Returns the number of acknowledgment calls scheduled. Must be called
    /// from within a tokio runtime.
    pub fn on_purchases_updated(&self, result: BillingResult, purchases: Vec<Purchase>) -> usize {
        match result.code {
            ResponseCode::Ok => {}
            ResponseCode::UserCanceled => {
                info!("purchase flow cancelled by user");
                self.correlator.settle(Err(BillingError::UserCanceled));
                return 0;
            }
            code => {
                warn!(%code, "purchase flow failed: {}", result.debug_message);
                self.correlator.settle(Err(BillingError::provider(&result)));
                return 0;
            }
        }

        debug!(count = purchases.len(), "purchases updated");
        let mut seen = HashSet::new();
        let mut scheduled = 0;

        for purchase in &purchases {
            if matches!(purchase.state, PurchaseState::Purchased | PurchaseState::Pending) {
                // Only the first settles; later calls find the slot empty.
                self.correlator.settle(Ok(PurchaseOutcome {
                    purchase_token: purchase.purchase_token.clone(),
                    product_id: purchase.product_id().to_string(),
                    order_id: purchase.order_id.clone(),
                    pending: purchase.state == PurchaseState::Pending,
                }));
            }

            if purchase.state != PurchaseState::Purchased || purchase.acknowledged {
                continue;
            }
            if !seen.insert(purchase.purchase_token.as_str()) {
                continue;
            }
            if self.spawn_acknowledge(&purchase.purchase_token) {
                scheduled += 1;
            }
        }

        scheduled
    }

    /// Fire-and-forget acknowledgment. Returns false when one is already in
    /// flight for the token.
    fn spawn_acknowledge(&self, purchase_token: &str) -> bool {
        if !self
            .shared
            .lock()
            .acknowledging
            .insert(purchase_token.to_string())
        {
            debug!(purchase_token, "acknowledgment already in flight");
            return false;
        }

        let provider = self.provider.clone();
        let shared = self.shared.clone();
        let token = purchase_token.to_string();
        tokio::spawn(async move {
            let result = provider.acknowledge_purchase(&token).await;
            if result.is_ok() {
                debug!(purchase_token = %token, "purchase acknowledged");
            } else {
                warn!(
                    purchase_token = %token,
                    code = %result.code,
                    "failed to acknowledge purchase: {}",
                    result.debug_message
                );
            }
            shared.lock().acknowledging.remove(&token);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{purchase, wait_for, MockBillingProvider};

    fn setup() -> (
        Arc<MockBillingProvider>,
        PurchaseCorrelator,
        PurchaseReconciler,
    ) {
        let provider = MockBillingProvider::new();
        let shared = SharedState::new();
        let correlator = PurchaseCorrelator::new(shared.clone());
        let reconciler = PurchaseReconciler::new(provider.clone(), correlator.clone(), shared);
        (provider, correlator, reconciler)
    }

    #[tokio::test]
    async fn test_purchased_settles_and_acknowledges_once() {
        let (provider, correlator, reconciler) = setup();
        let ticket = correlator.begin("sub_pro").unwrap();

        let p = purchase("T1", "sub_pro", PurchaseState::Purchased, false);
        let scheduled = reconciler.on_purchases_updated(BillingResult::ok(), vec![p.clone(), p]);
        assert_eq!(scheduled, 1);

        let outcome = ticket.outcome().await.unwrap();
        assert_eq!(outcome.purchase_token, "T1");
        assert_eq!(outcome.order_id.as_deref(), Some("O-T1"));
        assert!(!outcome.pending);

        assert!(wait_for(|| provider.acknowledged_tokens().len() == 1).await);
        tokio::task::yield_now().await;
        assert_eq!(provider.acknowledged_tokens(), vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn test_acknowledged_purchase_is_not_acknowledged_again() {
        let (provider, correlator, reconciler) = setup();
        let ticket = correlator.begin("sub_pro").unwrap();

        let scheduled = reconciler.on_purchases_updated(
            BillingResult::ok(),
            vec![purchase("T1", "sub_pro", PurchaseState::Purchased, true)],
        );
        assert_eq!(scheduled, 0);
        assert!(ticket.outcome().await.is_ok());
        assert!(provider.acknowledged_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_pending_purchase_settles_without_acknowledgment() {
        let (provider, correlator, reconciler) = setup();
        let ticket = correlator.begin("sub_pro").unwrap();

        reconciler.on_purchases_updated(
            BillingResult::ok(),
            vec![purchase("T2", "sub_pro", PurchaseState::Pending, false)],
        );
        assert!(ticket.outcome().await.unwrap().pending);
        assert_eq!(reconciler.on_purchases_updated(BillingResult::ok(), vec![]), 0);
        assert!(provider.acknowledged_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_settles_without_acknowledgment() {
        let (provider, correlator, reconciler) = setup();
        let ticket = correlator.begin("sub_pro").unwrap();

        reconciler.on_purchases_updated(
            BillingResult::new(ResponseCode::UserCanceled, ""),
            vec![purchase("T1", "sub_pro", PurchaseState::Purchased, false)],
        );
        assert_eq!(ticket.outcome().await.unwrap_err(), BillingError::UserCanceled);
        assert!(provider.acknowledged_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_passes_through() {
        let (_provider, correlator, reconciler) = setup();
        let ticket = correlator.begin("sub_pro").unwrap();

        reconciler.on_purchases_updated(
            BillingResult::new(ResponseCode::ItemAlreadyOwned, "already subscribed"),
            vec![],
        );
        let err = ticket.outcome().await.unwrap_err();
        assert_eq!(err.code(), "ITEM_ALREADY_OWNED");
        assert_eq!(err.message(), "already subscribed");
    }

    #[tokio::test]
    async fn test_first_purchase_settles_others_still_acknowledged() {
        let (provider, correlator, reconciler) = setup();
        let ticket = correlator.begin("sub_pro").unwrap();

        let scheduled = reconciler.on_purchases_updated(
            BillingResult::ok(),
            vec![
                purchase("T1", "sub_pro", PurchaseState::Purchased, false),
                purchase("T2", "sub_plus", PurchaseState::Purchased, false),
                purchase("T3", "sub_max", PurchaseState::Unspecified, false),
            ],
        );
        assert_eq!(scheduled, 2);
        assert_eq!(ticket.outcome().await.unwrap().purchase_token, "T1");

        assert!(wait_for(|| provider.acknowledged_tokens().len() == 2).await);
        let mut acked = provider.acknowledged_tokens();
        acked.sort();
        assert_eq!(acked, vec!["T1".to_string(), "T2".to_string()]);
    }

    #[tokio::test]
    async fn test_acknowledgment_failure_is_log_only() {
        let (provider, correlator, reconciler) = setup();
        provider.set_ack_result(BillingResult::new(ResponseCode::Error, "backend down"));
        let ticket = correlator.begin("sub_pro").unwrap();

        reconciler.on_purchases_updated(
            BillingResult::ok(),
            vec![purchase("T1", "sub_pro", PurchaseState::Purchased, false)],
        );
        assert!(ticket.outcome().await.is_ok());
        assert!(wait_for(|| provider.acknowledged_tokens().len() == 1).await);
    }

    #[tokio::test]
    async fn test_unsolicited_update_without_pending_request() {
        let (provider, correlator, reconciler) = setup();

        let scheduled = reconciler.on_purchases_updated(
            BillingResult::ok(),
            vec![purchase("T1", "sub_pro", PurchaseState::Purchased, false)],
        );
        assert_eq!(scheduled, 1);
        assert!(!correlator.has_pending());
        assert!(wait_for(|| provider.acknowledged_tokens().len() == 1).await);
    }
}
