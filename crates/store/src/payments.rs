use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, Version};
use domain::{Payment, PaymentStatus};

use crate::Result;

/// Storage of payments.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a new payment.
    ///
    /// Fails with `Duplicate` if the order already has a payment that is not
    /// cancelled.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>>;

    /// The order's payment that is not cancelled, if any.
    async fn find_active_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Compare-and-set write of every mutable payment field. Returns the new
    /// version.
    async fn update_payment(&self, payment: &Payment, expected: Version) -> Result<Version>;

    /// Pending or processing payments whose expiry is before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Payment>>;

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>>;
}
