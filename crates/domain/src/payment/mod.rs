//! Payment entity and related types.

mod aggregate;
mod method;
mod outcome;
mod state;

pub use aggregate::Payment;
pub use method::PaymentMethod;
pub use outcome::{GatewayOutcome, GatewayStatus};
pub use state::PaymentStatus;

use thiserror::Error;

use crate::value_objects::Money;

/// Errors that can occur during payment operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// Payment is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: PaymentStatus,
        action: &'static str,
    },

    /// Payments must be for a positive amount.
    #[error("Invalid payment amount: {amount}")]
    InvalidAmount { amount: Money },

    /// Payment lifetime must be positive.
    #[error("Invalid payment TTL: {minutes} minutes")]
    InvalidTtl { minutes: i64 },

    /// Refund amount must be positive.
    #[error("Invalid refund amount: {amount}")]
    InvalidRefundAmount { amount: Money },

    /// Refund larger than what was paid.
    #[error("Refund of {requested} exceeds payment amount {paid}")]
    RefundExceedsAmount { requested: Money, paid: Money },

    /// The gateway reported a different transaction than the one on record.
    #[error("Transaction mismatch: expected {expected}, got {actual}")]
    TransactionMismatch { expected: String, actual: String },
}
