//! Caller-facing billing engine.
//!
//! [`BillingEngine`] wires the connection manager, catalog, correlator,
//! reconciler and restore service around one shared state, and runs the
//! provider event pump that feeds purchase updates and disconnections back
//! into them.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{normalize_product_ids, ProductCatalogService, ProductRecord};
use crate::config::BillingConfig;
use crate::connection::ConnectionManager;
use crate::correlator::{PurchaseCorrelator, PurchaseOutcome};
use crate::ownership::hash_account_id;
use crate::provider::{
    BillingFlowParams, BillingProvider, HostActivity, ProductQuery, ProviderEvent,
};
use crate::reconciler::PurchaseReconciler;
use crate::restore::{EnrichedPurchase, RestoreService, SubscriptionStatus};
use crate::state::{ConnectionState, SharedState};
use crate::{BillingError, Result};

/// The purchase orchestration engine.
///
/// One engine owns one provider connection and at most one in-flight
/// purchase request. All operations are async and must run inside a tokio
/// runtime.
pub struct BillingEngine {
    provider: Arc<dyn BillingProvider>,
    host: Arc<dyn HostActivity>,
    config: BillingConfig,
    shared: SharedState,
    connection: ConnectionManager,
    catalog: ProductCatalogService,
    correlator: PurchaseCorrelator,
    reconciler: PurchaseReconciler,
    restore: RestoreService,
    events: Mutex<Option<mpsc::UnboundedReceiver<ProviderEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BillingEngine {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        host: Arc<dyn HostActivity>,
        config: BillingConfig,
    ) -> Self {
        let shared = SharedState::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let connection =
            ConnectionManager::new(provider.clone(), shared.clone(), config.clone(), events_tx);
        let catalog = ProductCatalogService::new(provider.clone(), config.product_type);
        let correlator = PurchaseCorrelator::new(shared.clone());
        let reconciler =
            PurchaseReconciler::new(provider.clone(), correlator.clone(), shared.clone());
        let restore = RestoreService::new(provider.clone(), catalog.clone(), config.product_type);

        Self {
            provider,
            host,
            config,
            shared,
            connection,
            catalog,
            correlator,
            reconciler,
            restore,
            events: Mutex::new(Some(events_rx)),
            pump: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn has_pending_purchase(&self) -> bool {
        self.correlator.has_pending()
    }

    /// Connect to the provider and start consuming its events.
    pub async fn initialize(&self) -> Result<()> {
        if self.shared.lock().destroyed {
            return Err(BillingError::InitFailed(
                "billing engine has been shut down".into(),
            ));
        }
        if self.host.current_activity().is_none() {
            return Err(BillingError::ActivityUnavailable);
        }

        self.start_event_pump();

        match self.connection.ensure_ready().await {
            Ok(()) => {
                self.shared.lock().initialized = true;
                info!("billing initialized");
                Ok(())
            }
            Err(BillingError::Destroyed) => Err(BillingError::InitFailed(
                "billing engine shut down during initialization".into(),
            )),
            Err(e) => Err(e),
        }
    }

    fn start_event_pump(&self) {
        let mut pump = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if pump.is_some() {
            return;
        }
        let Some(mut events) = self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
        else {
            return;
        };

        let reconciler = self.reconciler.clone();
        let connection = self.connection.clone();
        *pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProviderEvent::PurchasesUpdated { result, purchases } => {
                        reconciler.on_purchases_updated(result, purchases);
                    }
                    ProviderEvent::Disconnected => connection.on_disconnected(),
                }
            }
            debug!("provider event stream closed");
        }));
    }

    /// Readiness gate shared by every operation except `initialize`.
    async fn ready(&self) -> Result<()> {
        {
            let state = self.shared.lock();
            if state.destroyed {
                return Err(BillingError::Destroyed);
            }
            if !state.initialized {
                return Err(BillingError::NotInitialized);
            }
        }
        self.connection.ensure_ready().await
    }

    /// Product records for the given subscription product ids.
    pub async fn query_products<S: AsRef<str>>(&self, product_ids: &[S]) -> Result<Vec<ProductRecord>> {
        let ids = normalize_product_ids(product_ids)?;
        self.ready().await?;
        self.catalog.query_products(ids.as_slice()).await
    }

    /// Launch the purchase flow for `product_id` and wait for the provider to
    /// report its outcome.
    ///
    /// When `account` is non-blank the flow is tagged with its ownership
    /// token so the purchase can later be restored for that account.
    pub async fn start_purchase(
        &self,
        product_id: &str,
        account: Option<&str>,
    ) -> Result<PurchaseOutcome> {
        if product_id.trim().is_empty() {
            return Err(BillingError::missing_param("product_id"));
        }
        self.ready().await?;

        let ticket = self.correlator.begin(product_id)?;
        let request_id = ticket.request_id();
        if let Err(e) = self.launch(product_id, account).await {
            warn!(request_id, product_id, code = e.code(), "purchase flow not launched: {}", e);
            self.correlator.settle_request(request_id, Err(e));
        }

        ticket.outcome().await
    }

    async fn launch(&self, product_id: &str, account: Option<&str>) -> Result<()> {
        let query = ProductQuery::new(product_id, self.config.product_type);
        let (result, details) = self.provider.query_product_details(vec![query]).await;
        if !result.is_ok() {
            return Err(BillingError::QueryFailed {
                message: result.debug_message,
            });
        }

        let product = details
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::ProductNotFound(product_id.to_string()))?;
        let offer_token = product
            .subscription_offers
            .first()
            .map(|offer| offer.offer_token.clone())
            .ok_or_else(|| BillingError::NoOffers(product_id.to_string()))?;
        let activity = self
            .host
            .current_activity()
            .ok_or(BillingError::ActivityUnavailable)?;

        let params = BillingFlowParams {
            product,
            offer_token,
            obfuscated_account_id: account.and_then(hash_account_id).map(String::from),
        };
        debug!(
            product_id,
            tagged = params.obfuscated_account_id.is_some(),
            "launching billing flow"
        );

        let result = self.provider.launch_billing_flow(&activity, params).await;
        if !result.is_ok() {
            let message = if result.debug_message.is_empty() {
                result.code.as_str().to_string()
            } else {
                result.debug_message
            };
            return Err(BillingError::LaunchFailed { message });
        }
        Ok(())
    }

    /// Completed purchases owned by `account`. No account, no purchases.
    pub async fn query_purchases(&self, account: Option<&str>) -> Result<Vec<EnrichedPurchase>> {
        let account = account.unwrap_or_default();
        if hash_account_id(account).is_none() {
            return Ok(Vec::new());
        }
        self.ready().await?;
        self.restore.restore(account).await
    }

    /// Explicitly acknowledge a purchase.
    pub async fn acknowledge_purchase(&self, purchase_token: &str) -> Result<()> {
        if purchase_token.trim().is_empty() {
            return Err(BillingError::missing_param("purchase_token"));
        }
        self.ready().await?;

        let result = self.provider.acknowledge_purchase(purchase_token).await;
        if !result.is_ok() {
            return Err(BillingError::provider(&result));
        }
        debug!(purchase_token, "purchase acknowledged");
        Ok(())
    }

    /// Entitlement for `product_id` held by `account`.
    ///
    /// A still-unacknowledged purchase is acknowledged on the way; failure to
    /// do so is logged and does not affect the returned status.
    pub async fn check_subscription(
        &self,
        product_id: &str,
        account: Option<&str>,
    ) -> Result<SubscriptionStatus> {
        if product_id.trim().is_empty() {
            return Err(BillingError::missing_param("product_id"));
        }
        let account = account.unwrap_or_default();
        if hash_account_id(account).is_none() {
            return Ok(SubscriptionStatus::default());
        }
        self.ready().await?;

        let purchases = self.restore.restore(account).await?;
        let mut status = SubscriptionStatus::from_purchases(product_id, purchases);

        if let Some(purchase) = status.purchase.as_mut().filter(|p| !p.acknowledged) {
            let in_flight = !self
                .shared
                .lock()
                .acknowledging
                .insert(purchase.purchase_token.clone());
            if in_flight {
                debug!(purchase_token = %purchase.purchase_token, "acknowledgment already in flight");
                return Ok(status);
            }
            let result = self
                .provider
                .acknowledge_purchase(&purchase.purchase_token)
                .await;
            self.shared
                .lock()
                .acknowledging
                .remove(&purchase.purchase_token);
            if result.is_ok() {
                purchase.acknowledged = true;
            } else {
                warn!(
                    purchase_token = %purchase.purchase_token,
                    code = %result.code,
                    "failed to acknowledge purchase: {}",
                    result.debug_message
                );
            }
        }

        Ok(status)
    }

    /// Tear down: release the connection, fail parked callers and settle any
    /// pending purchase with `DESTROYED`. Terminal.
    pub async fn shutdown(&self) {
        if self.shared.lock().destroyed {
            return;
        }

        self.connection.shutdown().await;
        self.correlator.settle(Err(BillingError::Destroyed));

        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
        info!("billing engine shut down");
    }
}

impl Drop for BillingEngine {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
    }
}
