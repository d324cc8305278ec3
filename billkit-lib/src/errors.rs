//! Error types for billing operations.
//!
//! Every failure carries a stable string code (see [`BillingError::code`]) that
//! callers branch on, plus a human-readable message that they must not parse.

use crate::provider::{BillingResult, ResponseCode};

/// Comprehensive error type for billing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    /// A required caller parameter was missing or empty.
    #[error("missing required parameter: {0}")]
    MissingParam(String),

    /// An operation ran before `initialize` succeeded.
    #[error("billing not initialized")]
    NotInitialized,

    /// The host has no foreground activity to attach the provider UI to.
    #[error("no host activity available")]
    ActivityUnavailable,

    /// The engine could not be initialized.
    #[error("failed to initialize billing: {0}")]
    InitFailed(String),

    /// Connecting to the provider failed terminally (after any retries).
    #[error("failed to connect to billing service: {message}")]
    ConnectionFailed {
        /// Debug message of the last failed attempt.
        message: String,
    },

    /// The product lookup preceding a purchase flow failed.
    #[error("failed to query product: {message}")]
    QueryFailed {
        /// Provider debug message.
        message: String,
    },

    /// The provider returned no details for the requested product.
    #[error("product not found: {0}")]
    ProductNotFound(String),

    /// The product exists but carries no subscription offer.
    #[error("no subscription offers available for {0}")]
    NoOffers(String),

    /// The provider refused to launch the purchase UI.
    #[error("failed to launch billing flow: {message}")]
    LaunchFailed {
        /// Provider debug message.
        message: String,
    },

    /// The user dismissed the purchase UI.
    #[error("user cancelled the purchase")]
    UserCanceled,

    /// A newer purchase request replaced this one.
    #[error("purchase request superseded by a newer request")]
    Superseded,

    /// The engine was shut down while the request was outstanding.
    #[error("billing engine destroyed")]
    Destroyed,

    /// A provider failure passed through untouched.
    #[error("{message}")]
    Provider {
        /// Provider response code.
        code: ResponseCode,
        /// Provider debug message.
        message: String,
    },
}

impl BillingError {
    /// Stable code callers branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParam(_) => "MISSING_PARAM",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::ActivityUnavailable => "ACTIVITY_UNAVAILABLE",
            Self::InitFailed(_) => "INIT_FAILED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::QueryFailed { .. } => "QUERY_FAILED",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::NoOffers(_) => "NO_OFFERS",
            Self::LaunchFailed { .. } => "LAUNCH_FAILED",
            Self::UserCanceled => "USER_CANCELED",
            Self::Superseded => "SUPERSEDED",
            Self::Destroyed => "DESTROYED",
            Self::Provider { code, .. } => code.as_str(),
        }
    }

    /// Get the error message as an owned String (useful for FFI).
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a missing-parameter error.
    pub fn missing_param(name: impl Into<String>) -> Self {
        Self::MissingParam(name.into())
    }

    /// Pass a provider result through with its code and debug message intact.
    pub fn provider(result: &BillingResult) -> Self {
        Self::Provider {
            code: result.code,
            message: result.debug_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BillingError::Superseded.code(), "SUPERSEDED");
        assert_eq!(
            BillingError::ConnectionFailed {
                message: "down".into()
            }
            .code(),
            "CONNECTION_FAILED"
        );
        assert_eq!(BillingError::missing_param("product_id").code(), "MISSING_PARAM");
    }

    #[test]
    fn test_provider_passthrough() {
        let result = BillingResult::new(ResponseCode::ItemUnavailable, "gone from store");
        let err = BillingError::provider(&result);
        assert_eq!(err.code(), "ITEM_UNAVAILABLE");
        assert_eq!(err.message(), "gone from store");
    }

    #[test]
    fn test_error_display() {
        let err = BillingError::NoOffers("legacy_item".into());
        assert!(err.to_string().contains("legacy_item"));
    }
}
