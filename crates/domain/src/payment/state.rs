//! Payment state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownVariant;

/// The status of a payment in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Completed ──► Refunded
///    │            │
///    └────────────┴──► Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created, waiting for the buyer to pay.
    #[default]
    Pending,

    /// Handed to the gateway, waiting for its verdict.
    Processing,

    /// Gateway confirmed the payment.
    Completed,

    /// Gateway declined, or the payment expired (terminal state).
    Failed,

    /// Cancelled before settlement (terminal state).
    Cancelled,

    /// Money returned after completion (terminal state).
    Refunded,
}

impl PaymentStatus {
    /// Returns true if the payment can be handed to the gateway.
    pub fn can_start_processing(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }

    /// Returns true if the payment can be completed in this state.
    pub fn can_complete(&self) -> bool {
        self.is_open()
    }

    /// Returns true if the payment can be failed in this state.
    pub fn can_fail(&self) -> bool {
        self.is_open()
    }

    /// Returns true if the payment can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        self.is_open()
    }

    /// Returns true if a refund can be issued in this state.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }

    /// Pending or processing: the gateway outcome is still unknown.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Returns true if the gateway outcome is settled.
    ///
    /// `Completed` is terminal for the order cascade even though it can still
    /// move to `Refunded`.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Every status except `Cancelled` blocks a second payment for the order.
    pub fn is_active(&self) -> bool {
        !matches!(self, PaymentStatus::Cancelled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}
