//! Order entity implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, StockUnitId, UserId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{Money, ProductId};

use super::{OrderError, OrderStatus};

/// A line of an order: one stock unit bound to the product snapshot taken
/// when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub stock_unit_id: StockUnitId,
}

impl OrderItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Money,
        stock_unit_id: StockUnitId,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            unit_price,
            stock_unit_id,
        }
    }
}

/// A buyer's order, backed by reserved (later sold) stock units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub total_amount: Money,
    pub status: OrderStatus,
    /// Reason recorded by the last fail or cancel.
    pub status_reason: Option<String>,
    pub items: Vec<OrderItem>,
    /// Compare-and-set token for status writes.
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order. The total is the sum of the item prices.
    pub fn new(
        user_id: UserId,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let total_amount = items.iter().map(|item| item.unit_price).sum();

        Ok(Self {
            id: OrderId::new(),
            user_id,
            order_number: generate_order_number(now),
            total_amount,
            status: OrderStatus::Pending,
            status_reason: None,
            items,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if `user_id` placed this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Returns the ids of every bound stock unit, in item order.
    pub fn stock_unit_ids(&self) -> Vec<StockUnitId> {
        self.items.iter().map(|item| item.stock_unit_id).collect()
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// PENDING → PROCESSING.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_start_processing() {
            return Err(self.invalid("start processing"));
        }
        self.transition(OrderStatus::Processing, None, now);
        Ok(())
    }

    /// PENDING | PROCESSING → COMPLETED.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(self.invalid("complete"));
        }
        self.transition(OrderStatus::Completed, None, now);
        Ok(())
    }

    /// PENDING | PROCESSING → FAILED.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_fail() {
            return Err(self.invalid("fail"));
        }
        self.transition(OrderStatus::Failed, Some(reason.into()), now);
        Ok(())
    }

    /// PENDING | PROCESSING → CANCELLED.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        self.transition(OrderStatus::Cancelled, Some(reason.into()), now);
        Ok(())
    }

    fn transition(&mut self, status: OrderStatus, reason: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        if reason.is_some() {
            self.status_reason = reason;
        }
        self.updated_at = now;
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStateTransition {
            current_state: self.status,
            action,
        }
    }
}

/// `ORD-YYYYMMDD-XXXXXXXX`: creation date plus 8 random upper-case hex digits.
fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, cents: i64) -> OrderItem {
        OrderItem::new(
            ProductId::new(product),
            format!("{product} key"),
            Money::from_cents(cents),
            StockUnitId::new(),
        )
    }

    fn pending_order() -> Order {
        Order::new(
            UserId::new(),
            vec![item("SKU-001", 1000), item("SKU-001", 1000), item("SKU-002", 550)],
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_order_totals_items() {
        let order = pending_order();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, Money::from_cents(2550));
        assert_eq!(order.items.len(), 3);
        assert_eq!(order.stock_unit_ids().len(), 3);
        assert_eq!(order.version, Version::first());
    }

    #[test]
    fn test_new_order_requires_items() {
        let result = Order::new(UserId::new(), vec![], Utc::now());
        assert!(matches!(result, Err(OrderError::NoItems)));
    }

    #[test]
    fn test_order_number_format() {
        let now = Utc::now();
        let order = Order::new(UserId::new(), vec![item("SKU-001", 100)], now).unwrap();
        let expected_prefix = format!("ORD-{}-", now.format("%Y%m%d"));

        assert!(order.order_number.starts_with(&expected_prefix));
        let suffix = &order.order_number[expected_prefix.len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_ownership() {
        let order = pending_order();
        assert!(order.is_owned_by(order.user_id));
        assert!(!order.is_owned_by(UserId::new()));
    }

    #[test]
    fn test_happy_path() {
        let mut order = pending_order();
        let now = Utc::now();
        order.mark_processing(now).unwrap();
        assert_eq!(order.status, OrderStatus::Processing);

        order.complete(now).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.is_terminal());
        assert_eq!(order.updated_at, now);
    }

    #[test]
    fn test_complete_directly_from_pending() {
        let mut order = pending_order();
        order.complete(Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_processing_only_from_pending() {
        let mut order = pending_order();
        order.mark_processing(Utc::now()).unwrap();

        let err = order.mark_processing(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidStateTransition {
                current_state: OrderStatus::Processing,
                action: "start processing",
            }
        ));
    }

    #[test]
    fn test_cancel_records_reason() {
        let mut order = pending_order();
        order.cancel("changed my mind", Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.status_reason.as_deref(), Some("changed my mind"));
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut failed = pending_order();
        failed.fail("Payment expired", Utc::now()).unwrap();

        assert!(failed.mark_processing(Utc::now()).is_err());
        assert!(failed.complete(Utc::now()).is_err());
        assert!(failed.fail("again", Utc::now()).is_err());
        assert!(failed.cancel("again", Utc::now()).is_err());
        assert_eq!(failed.status_reason.as_deref(), Some("Payment expired"));

        let mut completed = pending_order();
        completed.complete(Utc::now()).unwrap();
        assert!(completed.cancel("too late", Utc::now()).is_err());
        assert!(completed.fail("too late", Utc::now()).is_err());
    }
}
