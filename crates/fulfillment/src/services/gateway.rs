//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::PaymentId;
use domain::{GatewayStatus, Payment};
use serde_json::json;
use thiserror::Error;

/// Errors raised by a payment gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Gateway rejected payment: {0}")]
    Rejected(String),

    #[error("Unknown gateway transaction: {0}")]
    UnknownTransaction(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// Result of handing a payment to the gateway.
#[derive(Debug, Clone)]
pub struct GatewayInitiation {
    /// Gateway-side transaction id, echoed back by webhooks.
    pub transaction_id: String,
    /// Raw gateway response, kept for audit.
    pub response: serde_json::Value,
}

/// Outbound half of the gateway interface.
///
/// Verdicts arrive asynchronously through webhooks or by polling
/// [`PaymentGateway::check_status`].
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, payment: &Payment) -> Result<GatewayInitiation, GatewayError>;

    async fn check_status(&self, transaction_id: &str) -> Result<GatewayStatus, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    transactions: HashMap<String, (PaymentId, GatewayStatus)>,
    next_id: u32,
    fail_on_initiate: bool,
}

/// In-memory payment gateway for testing.
///
/// Transactions start `Pending`; tests script their verdict with
/// [`InMemoryPaymentGateway::set_status`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to reject every initiation.
    pub fn set_fail_on_initiate(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_initiate = fail;
    }

    /// Sets the status reported for a transaction. Returns false if unknown.
    pub fn set_status(&self, transaction_id: &str, status: GatewayStatus) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.transactions.get_mut(transaction_id) {
            Some(entry) => {
                entry.1 = status;
                true
            }
            None => false,
        }
    }

    /// Returns the number of initiated transactions.
    pub fn transaction_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .transactions
            .len()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(&self, payment: &Payment) -> Result<GatewayInitiation, GatewayError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_initiate {
            return Err(GatewayError::Rejected("Payment method declined".to_string()));
        }

        state.next_id += 1;
        let transaction_id = format!("TXN-{:04}", state.next_id);
        state
            .transactions
            .insert(transaction_id.clone(), (payment.id, GatewayStatus::Pending));

        Ok(GatewayInitiation {
            response: json!({
                "transaction_id": transaction_id,
                "reference": payment.reference,
                "amount": payment.amount.cents(),
                "method": payment.method.as_str(),
                "status": "PENDING",
            }),
            transaction_id,
        })
    }

    async fn check_status(&self, transaction_id: &str) -> Result<GatewayStatus, GatewayError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .transactions
            .get(transaction_id)
            .map(|(_, status)| *status)
            .ok_or_else(|| GatewayError::UnknownTransaction(transaction_id.to_string()))
    }
}
