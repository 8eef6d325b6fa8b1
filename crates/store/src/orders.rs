use async_trait::async_trait;
use common::{OrderId, StockUnitId, UserId, Version};
use domain::Order;

use crate::Result;

/// Stock mutation applied in the same transaction as an order status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockSettlement {
    /// Status change only.
    None,
    /// Sell every listed unit; any already sold aborts the whole write.
    Sell(Vec<StockUnitId>),
    /// Clear the hold on every listed unit that is not sold.
    Release(Vec<StockUnitId>),
}

/// Storage of orders and their items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order with its items.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Orders placed by `user_id`, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Writes the order's status fields if the stored version is still
    /// `expected`, applying `settlement` atomically with it.
    ///
    /// Returns the new version. Fails with `ConcurrencyConflict` if the
    /// version moved, `NotFound` if the order is unknown, and `StockConflict`
    /// if a sale hits a unit that is already sold.
    async fn update_order(
        &self,
        order: &Order,
        expected: Version,
        settlement: StockSettlement,
    ) -> Result<Version>;
}
