//! Billing provider boundary.
//!
//! The provider SDK delivers results out-of-band: direct calls return a
//! [`BillingResult`] (plus payload), while purchase updates and disconnections
//! are pushed as [`ProviderEvent`]s into the channel handed over at
//! [`BillingProvider::start_connection`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Response codes reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    /// Success.
    Ok,
    /// User pressed back or dismissed the purchase dialog.
    UserCanceled,
    /// The service is temporarily unreachable.
    ServiceUnavailable,
    /// The app lost its binding to the service.
    ServiceDisconnected,
    /// The call took too long.
    ServiceTimeout,
    /// Billing is not supported for this user or device.
    BillingUnavailable,
    /// The requested product is not available for purchase.
    ItemUnavailable,
    /// The item is already owned.
    ItemAlreadyOwned,
    /// The item is not owned and cannot be consumed or acknowledged.
    ItemNotOwned,
    /// The requested feature is not supported by the store.
    FeatureNotSupported,
    /// Invalid arguments supplied to the API.
    DeveloperError,
    /// A network error occurred during the operation.
    NetworkError,
    /// Fatal or generic error during the API action.
    Error,
}

impl ResponseCode {
    /// Name used as the caller-facing error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::UserCanceled => "USER_CANCELED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ServiceDisconnected => "SERVICE_DISCONNECTED",
            Self::ServiceTimeout => "SERVICE_TIMEOUT",
            Self::BillingUnavailable => "BILLING_UNAVAILABLE",
            Self::ItemUnavailable => "ITEM_UNAVAILABLE",
            Self::ItemAlreadyOwned => "ITEM_ALREADY_OWNED",
            Self::ItemNotOwned => "ITEM_NOT_OWNED",
            Self::FeatureNotSupported => "FEATURE_NOT_SUPPORTED",
            Self::DeveloperError => "DEVELOPER_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Error => "ERROR",
        }
    }

    /// Whether a failed connection attempt with this code is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable | Self::ServiceDisconnected | Self::Error
        )
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single provider call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingResult {
    /// Response code.
    pub code: ResponseCode,
    /// Provider debug message (may be empty).
    pub debug_message: String,
}

impl BillingResult {
    /// Create a result with a debug message.
    pub fn new(code: ResponseCode, debug_message: impl Into<String>) -> Self {
        Self {
            code,
            debug_message: debug_message.into(),
        }
    }

    /// Successful result.
    pub fn ok() -> Self {
        Self::new(ResponseCode::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}

/// Product category understood by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    /// Auto-renewing subscriptions.
    #[default]
    Subs,
    /// One-time in-app products.
    Inapp,
}

/// One entry of a batched product-details query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub product_id: String,
    pub product_type: ProductType,
}

impl ProductQuery {
    pub fn new(product_id: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            product_id: product_id.into(),
            product_type,
        }
    }
}

/// One stage of an offer's price schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPhase {
    /// Localized price string, e.g. "R49.99".
    pub formatted_price: String,
    /// Price in micro-units of the currency.
    pub price_amount_micros: i64,
    /// ISO 4217 currency code.
    pub price_currency_code: String,
}

/// A sellable configuration of a subscription product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOffer {
    /// Token identifying this offer when launching the purchase flow.
    pub offer_token: String,
    /// Price schedule, in provider order.
    pub pricing_phases: Vec<PricingPhase>,
}

/// Product metadata as returned by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub product_id: String,
    pub title: String,
    pub description: String,
    /// Subscription offers, in provider order. Empty for non-subscription products.
    pub subscription_offers: Vec<SubscriptionOffer>,
}

impl ProductDetails {
    /// First offer and its first pricing phase, if the product has one.
    pub fn primary_offer(&self) -> Option<(&SubscriptionOffer, &PricingPhase)> {
        let offer = self.subscription_offers.first()?;
        let phase = offer.pricing_phases.first()?;
        Some((offer, phase))
    }
}

/// Provider-defined purchase state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    /// Payment completed.
    Purchased,
    /// Awaiting an out-of-band payment step.
    Pending,
    /// Any other state; passed through untouched.
    Unspecified,
}

/// A purchase as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_token: String,
    /// Products covered by this purchase; single-item flows carry exactly one.
    pub products: Vec<String>,
    pub order_id: Option<String>,
    pub state: PurchaseState,
    pub acknowledged: bool,
    /// Purchase time in milliseconds since the epoch.
    pub purchase_time: i64,
    /// Opaque account token attached at launch time.
    pub obfuscated_account_id: Option<String>,
}

impl Purchase {
    /// Primary product of this purchase.
    pub fn product_id(&self) -> &str {
        self.products.first().map(String::as_str).unwrap_or_default()
    }
}

/// Parameters for launching the provider purchase UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingFlowParams {
    pub product: ProductDetails,
    pub offer_token: String,
    /// Hashed account identifier tagged onto the resulting purchase.
    pub obfuscated_account_id: Option<String>,
}

/// Events pushed by the provider outside any direct call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Result of a purchase flow (or an out-of-band purchase change).
    PurchasesUpdated {
        result: BillingResult,
        purchases: Vec<Purchase>,
    },
    /// The provider dropped the connection on its own.
    Disconnected,
}

/// Sender half handed to the provider for pushing events.
pub type ProviderEventSender = mpsc::UnboundedSender<ProviderEvent>;

/// Opaque handle to the host's foreground UI context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActivityHandle(pub String);

/// Host UI lifecycle collaborator.
pub trait HostActivity: Send + Sync {
    /// Current foreground activity, if any.
    fn current_activity(&self) -> Option<ActivityHandle>;
}

/// Asynchronous billing provider client.
///
/// Implementations wrap the platform SDK. Each method completes when the
/// SDK's callback fires; none of them block the calling thread.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Open the connection. Pushed events for the lifetime of the connection
    /// go to `events`.
    async fn start_connection(&self, events: ProviderEventSender) -> BillingResult;

    /// Release the connection.
    async fn end_connection(&self);

    /// Batched product metadata lookup.
    async fn query_product_details(
        &self,
        products: Vec<ProductQuery>,
    ) -> (BillingResult, Vec<ProductDetails>);

    /// All purchases of the given type currently owned on the device account.
    async fn query_purchases(&self, product_type: ProductType) -> (BillingResult, Vec<Purchase>);

    /// Launch the purchase UI. The outcome arrives later as
    /// [`ProviderEvent::PurchasesUpdated`].
    async fn launch_billing_flow(
        &self,
        activity: &ActivityHandle,
        params: BillingFlowParams,
    ) -> BillingResult;

    /// Confirm entitlement for a purchase.
    async fn acknowledge_purchase(&self, purchase_token: &str) -> BillingResult;
}
