//! Payment entity implementation.

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, PaymentId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::Money;

use super::{PaymentError, PaymentMethod, PaymentStatus};

/// The single live payment attempt for an order.
///
/// Invariant: `status == Refunded` implies the payment was completed first and
/// `refund_amount <= amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Payer-facing reference code, `PAY-XXXXXXXXXX`.
    pub reference: String,
    pub qr_payload: String,
    pub transaction_id: Option<String>,
    /// Last raw gateway response.
    pub gateway_response: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub refund_amount: Option<Money>,
    pub refund_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment that expires `ttl` after `now`.
    pub fn new(
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount });
        }
        if ttl <= Duration::zero() {
            return Err(PaymentError::InvalidTtl {
                minutes: ttl.num_minutes(),
            });
        }

        let reference = generate_reference();
        let qr_payload = format!("STOCKPAY|{}|{}", reference, amount.cents());

        Ok(Self {
            id: PaymentId::new(),
            order_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            reference,
            qr_payload,
            transaction_id: None,
            gateway_response: None,
            failure_reason: None,
            refund_amount: None,
            refund_reason: None,
            expires_at: now + ttl,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        })
    }

    /// An open payment whose expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at < now
    }

    /// PENDING → PROCESSING, recording the gateway transaction.
    pub fn start_processing(
        &mut self,
        transaction_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.status.can_start_processing() {
            return Err(self.invalid("start processing"));
        }
        self.transaction_id = Some(transaction_id.into());
        self.touch(PaymentStatus::Processing, now);
        Ok(())
    }

    /// PENDING | PROCESSING → COMPLETED.
    ///
    /// A transaction id already on record must match the one reported.
    pub fn complete(
        &mut self,
        transaction_id: impl Into<String>,
        gateway_response: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.status.can_complete() {
            return Err(self.invalid("complete"));
        }
        let transaction_id = transaction_id.into();
        if let Some(expected) = self.transaction_id.as_ref().filter(|t| **t != transaction_id) {
            return Err(PaymentError::TransactionMismatch {
                expected: expected.clone(),
                actual: transaction_id,
            });
        }
        self.transaction_id = Some(transaction_id);
        if gateway_response.is_some() {
            self.gateway_response = gateway_response;
        }
        self.touch(PaymentStatus::Completed, now);
        Ok(())
    }

    /// PENDING | PROCESSING → FAILED.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        gateway_response: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.status.can_fail() {
            return Err(self.invalid("fail"));
        }
        self.failure_reason = Some(reason.into());
        if gateway_response.is_some() {
            self.gateway_response = gateway_response;
        }
        self.touch(PaymentStatus::Failed, now);
        Ok(())
    }

    /// PENDING | PROCESSING → CANCELLED.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), PaymentError> {
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        self.failure_reason = Some(reason.into());
        self.touch(PaymentStatus::Cancelled, now);
        Ok(())
    }

    /// COMPLETED → REFUNDED. Happens at most once.
    pub fn refund(
        &mut self,
        amount: Money,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.status.can_refund() {
            return Err(self.invalid("refund"));
        }
        if !amount.is_positive() {
            return Err(PaymentError::InvalidRefundAmount { amount });
        }
        if amount > self.amount {
            return Err(PaymentError::RefundExceedsAmount {
                requested: amount,
                paid: self.amount,
            });
        }
        self.refund_amount = Some(amount);
        self.refund_reason = Some(reason.into());
        self.touch(PaymentStatus::Refunded, now);
        Ok(())
    }

    fn touch(&mut self, status: PaymentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    fn invalid(&self, action: &'static str) -> PaymentError {
        PaymentError::InvalidStateTransition {
            current_state: self.status,
            action,
        }
    }
}

/// `PAY-` followed by 10 random upper-case hex digits.
fn generate_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("PAY-{}", hex[..10].to_uppercase())
}
