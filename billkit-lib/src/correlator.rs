//! Pending-purchase correlation.
//!
//! The provider reports purchase outcomes through a shared listener, not as a
//! reply to `launch_billing_flow`. [`PurchaseCorrelator`] keeps a single slot
//! binding the in-flight purchase request to the caller awaiting it. Starting
//! a new request while one is outstanding fails the old one with
//! [`BillingError::Superseded`].

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::state::SharedState;
use crate::{BillingError, Result};

/// Result delivered to the caller of a purchase request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    pub purchase_token: String,
    pub product_id: String,
    pub order_id: Option<String>,
    /// True while the provider still awaits an out-of-band payment step.
    pub pending: bool,
}

/// The caller side of the pending slot.
pub struct PendingPurchaseRequest {
    request_id: u64,
    product_id: String,
    created_at: Instant,
    responder: oneshot::Sender<Result<PurchaseOutcome>>,
}

impl PendingPurchaseRequest {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn resolve(self, outcome: Result<PurchaseOutcome>) {
        debug!(
            request_id = self.request_id,
            product_id = %self.product_id,
            waited_ms = u64::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = outcome.is_ok(),
            "settling purchase request"
        );
        // Receiver may already be dropped.
        let _ = self.responder.send(outcome);
    }
}

/// Receiving end handed back to the caller by [`PurchaseCorrelator::begin`].
pub struct PurchaseTicket {
    request_id: u64,
    receiver: oneshot::Receiver<Result<PurchaseOutcome>>,
}

impl PurchaseTicket {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the request to be settled.
    pub async fn outcome(self) -> Result<PurchaseOutcome> {
        self.receiver.await.unwrap_or(Err(BillingError::Destroyed))
    }
}

/// Single-slot correlator for purchase requests.
#[derive(Clone)]
pub struct PurchaseCorrelator {
    shared: SharedState,
}

impl PurchaseCorrelator {
    pub(crate) fn new(shared: SharedState) -> Self {
        Self { shared }
    }

    /// Install a new pending request, superseding any outstanding one.
    pub fn begin(&self, product_id: &str) -> Result<PurchaseTicket> {
        let (ticket, superseded) = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return Err(BillingError::Destroyed);
            }

            let request_id = state.next_request_id;
            state.next_request_id += 1;

            let (responder, receiver) = oneshot::channel();
            let previous = state.pending.replace(PendingPurchaseRequest {
                request_id,
                product_id: product_id.to_string(),
                created_at: Instant::now(),
                responder,
            });
            (
                PurchaseTicket {
                    request_id,
                    receiver,
                },
                previous,
            )
        };

        if let Some(previous) = superseded {
            info!(
                superseded = previous.request_id,
                request_id = ticket.request_id,
                "superseding outstanding purchase request"
            );
            previous.resolve(Err(BillingError::Superseded));
        }

        Ok(ticket)
    }

    /// Settle whichever request is pending. Returns false (and does nothing)
    /// when the slot is empty.
    pub fn settle(&self, outcome: Result<PurchaseOutcome>) -> bool {
        let pending = self.shared.lock().pending.take();
        match pending {
            Some(request) => {
                request.resolve(outcome);
                true
            }
            None => {
                debug!("no pending purchase request to settle");
                false
            }
        }
    }

    /// Settle only if `request_id` still owns the slot.
    pub fn settle_request(&self, request_id: u64, outcome: Result<PurchaseOutcome>) -> bool {
        let pending = {
            let mut state = self.shared.lock();
            match &state.pending {
                Some(request) if request.request_id == request_id => state.pending.take(),
                _ => None,
            }
        };
        match pending {
            Some(request) => {
                request.resolve(outcome);
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(token: &str) -> PurchaseOutcome {
        PurchaseOutcome {
            purchase_token: token.into(),
            product_id: "sub_pro".into(),
            order_id: Some("O1".into()),
            pending: false,
        }
    }

    #[tokio::test]
    async fn test_settle_resolves_once() {
        let correlator = PurchaseCorrelator::new(SharedState::new());
        let ticket = correlator.begin("sub_pro").unwrap();

        assert!(correlator.settle(Ok(outcome("T1"))));
        assert!(!correlator.settle(Ok(outcome("T2"))));
        assert!(!correlator.has_pending());

        assert_eq!(ticket.outcome().await.unwrap().purchase_token, "T1");
    }

    #[tokio::test]
    async fn test_begin_supersedes_outstanding_request() {
        let correlator = PurchaseCorrelator::new(SharedState::new());
        let first = correlator.begin("sub_pro").unwrap();
        let second = correlator.begin("sub_pro").unwrap();
        assert_ne!(first.request_id(), second.request_id());

        assert_eq!(first.outcome().await.unwrap_err(), BillingError::Superseded);
        assert!(correlator.has_pending());

        correlator.settle(Err(BillingError::UserCanceled));
        assert_eq!(second.outcome().await.unwrap_err().code(), "USER_CANCELED");
    }

    #[test]
    fn test_settle_without_pending_is_noop() {
        let correlator = PurchaseCorrelator::new(SharedState::new());
        assert!(!correlator.settle(Err(BillingError::UserCanceled)));
    }

    #[tokio::test]
    async fn test_settle_request_ignores_stale_id() {
        let correlator = PurchaseCorrelator::new(SharedState::new());
        let first = correlator.begin("sub_pro").unwrap();
        let first_id = first.request_id();
        let second = correlator.begin("sub_pro").unwrap();

        assert!(!correlator.settle_request(first_id, Err(BillingError::NoOffers("x".into()))));
        assert!(correlator.has_pending());

        assert!(correlator.settle_request(second.request_id(), Ok(outcome("T9"))));
        assert_eq!(second.outcome().await.unwrap().purchase_token, "T9");
    }
}
