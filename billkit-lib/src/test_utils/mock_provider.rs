//! Scriptable billing provider and host stubs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::provider::{
    ActivityHandle, BillingFlowParams, BillingProvider, BillingResult, HostActivity,
    ProductDetails, ProductQuery, ProductType, ProviderEvent, ProviderEventSender, Purchase,
};

#[derive(Default)]
struct MockState {
    connect_script: VecDeque<BillingResult>,
    panic_next_connect: bool,
    connect_instants: Vec<Instant>,
    events: Option<ProviderEventSender>,
    end_count: usize,

    product_result: Option<BillingResult>,
    products: Vec<ProductDetails>,
    product_queries: Vec<Vec<ProductQuery>>,

    purchases_result: Option<BillingResult>,
    purchases: Vec<Purchase>,
    purchase_queries: usize,

    launch_result: Option<BillingResult>,
    launch_response: Option<(BillingResult, Vec<Purchase>)>,
    launched: Vec<BillingFlowParams>,

    ack_result: Option<BillingResult>,
    ack_gate: Option<Arc<Notify>>,
    acknowledged: Vec<String>,
}

/// In-memory provider. Every call succeeds unless scripted otherwise, and
/// every call is recorded.
#[derive(Default)]
pub struct MockBillingProvider {
    state: Mutex<MockState>,
}

impl MockBillingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Results for upcoming connection attempts, in order. Once exhausted,
    /// attempts succeed.
    pub fn script_connect(&self, results: Vec<BillingResult>) {
        self.state().connect_script.extend(results);
    }

    /// The next connection attempt panics inside the provider.
    pub fn panic_next_connect(&self) {
        self.state().panic_next_connect = true;
    }

    pub fn connect_count(&self) -> usize {
        self.state().connect_instants.len()
    }

    /// When each connection attempt happened, on the tokio clock.
    pub fn connect_instants(&self) -> Vec<Instant> {
        self.state().connect_instants.clone()
    }

    pub fn end_count(&self) -> usize {
        self.state().end_count
    }

    /// Catalog served by product queries. Queries return the requested
    /// subset in catalog order.
    pub fn set_products(&self, products: Vec<ProductDetails>) {
        self.state().products = products;
    }

    pub fn set_product_result(&self, result: BillingResult) {
        self.state().product_result = Some(result);
    }

    pub fn product_queries(&self) -> Vec<Vec<ProductQuery>> {
        self.state().product_queries.clone()
    }

    pub fn set_purchases(&self, purchases: Vec<Purchase>) {
        self.state().purchases = purchases;
    }

    pub fn set_purchases_result(&self, result: BillingResult) {
        self.state().purchases_result = Some(result);
    }

    pub fn purchase_query_count(&self) -> usize {
        self.state().purchase_queries
    }

    pub fn set_launch_result(&self, result: BillingResult) {
        self.state().launch_result = Some(result);
    }

    /// Push this purchase update after every successful launch.
    pub fn respond_to_launch(&self, result: BillingResult, purchases: Vec<Purchase>) {
        self.state().launch_response = Some((result, purchases));
    }

    pub fn launched_flows(&self) -> Vec<BillingFlowParams> {
        self.state().launched.clone()
    }

    pub fn set_ack_result(&self, result: BillingResult) {
        self.state().ack_result = Some(result);
    }

    /// The next acknowledgment is recorded, then parks until the returned
    /// gate is notified.
    pub fn hold_next_ack(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state().ack_gate = Some(gate.clone());
        gate
    }

    /// Tokens passed to `acknowledge_purchase`, failed calls included.
    pub fn acknowledged_tokens(&self) -> Vec<String> {
        self.state().acknowledged.clone()
    }

    /// Push a purchase update as the provider would. Returns false when no
    /// connection has been opened yet.
    pub fn emit_purchases_updated(&self, result: BillingResult, purchases: Vec<Purchase>) -> bool {
        self.emit(ProviderEvent::PurchasesUpdated { result, purchases })
    }

    pub fn emit_disconnected(&self) -> bool {
        self.emit(ProviderEvent::Disconnected)
    }

    fn emit(&self, event: ProviderEvent) -> bool {
        match &self.state().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Calls of any kind made against this provider.
    pub fn total_calls(&self) -> usize {
        let state = self.state();
        state.connect_instants.len()
            + state.end_count
            + state.product_queries.len()
            + state.purchase_queries
            + state.launched.len()
            + state.acknowledged.len()
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    async fn start_connection(&self, events: ProviderEventSender) -> BillingResult {
        let mut state = self.state();
        if std::mem::take(&mut state.panic_next_connect) {
            drop(state);
            panic!("billing service crashed during connect");
        }
        state.connect_instants.push(Instant::now());
        let result = state.connect_script.pop_front().unwrap_or_else(BillingResult::ok);
        if result.is_ok() {
            state.events = Some(events);
        }
        result
    }

    async fn end_connection(&self) {
        let mut state = self.state();
        state.end_count += 1;
        state.events = None;
    }

    async fn query_product_details(
        &self,
        products: Vec<ProductQuery>,
    ) -> (BillingResult, Vec<ProductDetails>) {
        let mut state = self.state();
        let result = state.product_result.clone().unwrap_or_else(BillingResult::ok);
        let details = if result.is_ok() {
            state
                .products
                .iter()
                .filter(|p| products.iter().any(|q| q.product_id == p.product_id))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        state.product_queries.push(products);
        (result, details)
    }

    async fn query_purchases(&self, _product_type: ProductType) -> (BillingResult, Vec<Purchase>) {
        let mut state = self.state();
        state.purchase_queries += 1;
        match state.purchases_result.clone() {
            Some(result) if !result.is_ok() => (result, Vec::new()),
            _ => (BillingResult::ok(), state.purchases.clone()),
        }
    }

    async fn launch_billing_flow(
        &self,
        _activity: &ActivityHandle,
        params: BillingFlowParams,
    ) -> BillingResult {
        let mut state = self.state();
        state.launched.push(params);
        let result = state.launch_result.clone().unwrap_or_else(BillingResult::ok);
        if result.is_ok() {
            if let (Some((update, purchases)), Some(events)) =
                (state.launch_response.clone(), state.events.as_ref())
            {
                let _ = events.send(ProviderEvent::PurchasesUpdated {
                    result: update,
                    purchases,
                });
            }
        }
        result
    }

    async fn acknowledge_purchase(&self, purchase_token: &str) -> BillingResult {
        let (result, gate) = {
            let mut state = self.state();
            state.acknowledged.push(purchase_token.to_string());
            (
                state.ack_result.clone().unwrap_or_else(BillingResult::ok),
                state.ack_gate.take(),
            )
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        result
    }
}

/// Host stub with a settable foreground activity.
pub struct MockHost {
    activity: Mutex<Option<ActivityHandle>>,
}

impl MockHost {
    /// Host showing activity `"main"`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            activity: Mutex::new(Some(ActivityHandle("main".to_string()))),
        })
    }

    pub fn without_activity() -> Arc<Self> {
        Arc::new(Self {
            activity: Mutex::new(None),
        })
    }

    pub fn set_activity(&self, activity: Option<ActivityHandle>) {
        *self.activity.lock().unwrap_or_else(|e| e.into_inner()) = activity;
    }
}

impl HostActivity for MockHost {
    fn current_activity(&self) -> Option<ActivityHandle> {
        self.activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
