//! Order orchestration: creation against reserved stock and the status
//! machine that settles it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use common::{Clock, OrderId, StockUnitId, UserId};
use domain::{Order, OrderError, OrderItem, OrderStatus, ProductId};
use serde::Serialize;
use store::{StockSettlement, Store};

use crate::error::{EngineError, Result};
use crate::ledger::StockLedger;
use crate::reservation::ReservationCoordinator;
use crate::services::Catalog;

/// A purchased credential, opened for its buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub stock_unit_id: StockUnitId,
    pub credential: String,
}

/// Owns the order status machine.
///
/// ```text
/// PENDING ──► PROCESSING ──► COMPLETED   (sells every bound unit)
///    │             │
///    └─────────────┴──► FAILED | CANCELLED (releases every bound unit)
/// ```
///
/// Every status write is a compare-and-set on the order version, applied in
/// the same store transaction as its stock settlement.
#[derive(Clone)]
pub struct OrderService<S, C> {
    store: S,
    ledger: StockLedger<S, C>,
    reservations: ReservationCoordinator<S, C>,
    clock: Arc<dyn Clock>,
    reservation_ttl: Duration,
}

impl<S, C> OrderService<S, C>
where
    S: Store + Clone,
    C: Catalog + Clone,
{
    pub fn new(
        store: S,
        ledger: StockLedger<S, C>,
        reservations: ReservationCoordinator<S, C>,
        clock: Arc<dyn Clock>,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            reservations,
            clock,
            reservation_ttl,
        }
    }

    /// Reserves stock for every requested product and persists a PENDING
    /// order bound to the claimed units.
    ///
    /// Prices and names are snapshotted from the catalog. If the order cannot
    /// be persisted, every claimed unit is released before the error returns.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        quantities: BTreeMap<ProductId, u32>,
    ) -> Result<Order> {
        let start = std::time::Instant::now();

        let reserved = self
            .reservations
            .reserve_for_order(&quantities, self.reservation_ttl)
            .await?;

        let mut items = Vec::new();
        for (product_id, units) in &reserved.units {
            let Some(product) = reserved.products.get(product_id) else {
                continue;
            };
            items.extend(units.iter().map(|unit| {
                OrderItem::new(product_id.clone(), product.name.clone(), product.price, unit.id)
            }));
        }

        let order = match Order::new(user_id, items, self.clock.now()) {
            Ok(order) => order,
            Err(e) => {
                self.reservations.release_all(reserved.all_units()).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.insert_order(&order).await {
            tracing::warn!(error = %e, "order insert failed, releasing reserved stock");
            self.reservations.release_all(reserved.all_units()).await;
            return Err(e.into());
        }

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_creation_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = order.items.len(),
            total = %order.total_amount,
            "order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("order", order_id))
    }

    /// Loads an order on behalf of `user_id`, who must have placed it.
    pub async fn get_order_for_user(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if !order.is_owned_by(user_id) {
            return Err(EngineError::Unauthorized(format!(
                "order {order_id} belongs to another user"
            )));
        }
        Ok(order)
    }

    /// Orders placed by `user_id`, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.orders_for_user(user_id).await?)
    }

    /// PENDING → PROCESSING.
    #[tracing::instrument(skip(self))]
    pub async fn mark_as_processing(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        let expected = order.version;
        order
            .mark_processing(self.clock.now())
            .inspect_err(|e| tracing::warn!(%order_id, error = %e, "order transition rejected"))?;

        order.version = self
            .store
            .update_order(&order, expected, StockSettlement::None)
            .await?;
        tracing::info!(%order_id, "order processing");
        Ok(order)
    }

    /// PENDING | PROCESSING → COMPLETED, selling every bound unit.
    ///
    /// If any unit cannot be sold the whole completion fails and the order
    /// keeps its current status.
    #[tracing::instrument(skip(self))]
    pub async fn mark_as_completed(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        let expected = order.version;
        order
            .complete(self.clock.now())
            .inspect_err(|e| tracing::warn!(%order_id, error = %e, "order transition rejected"))?;

        order.version = self.ledger.sell_for_order(&order, expected).await?;
        metrics::counter!("orders_completed_total").increment(1);
        tracing::info!(%order_id, units = order.items.len(), "order completed");
        Ok(order)
    }

    /// PENDING | PROCESSING → FAILED, releasing every bound unit.
    #[tracing::instrument(skip(self))]
    pub async fn mark_as_failed(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        let expected = order.version;
        order
            .fail(reason, self.clock.now())
            .inspect_err(|e| tracing::warn!(%order_id, error = %e, "order transition rejected"))?;

        order.version = self.ledger.release_for_order(&order, expected).await?;
        metrics::counter!("orders_failed_total").increment(1);
        tracing::info!(%order_id, reason, "order failed");
        Ok(order)
    }

    /// PENDING | PROCESSING → CANCELLED, releasing every bound unit.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        self.cancel(order, reason).await
    }

    /// Cancels on behalf of `user_id`, who must have placed the order.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order_by_user(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: &str,
    ) -> Result<Order> {
        let order = self.get_order_for_user(order_id, user_id).await?;
        self.cancel(order, reason).await
    }

    async fn cancel(&self, mut order: Order, reason: &str) -> Result<Order> {
        let order_id = order.id;
        let expected = order.version;
        order
            .cancel(reason, self.clock.now())
            .inspect_err(|e| tracing::warn!(%order_id, error = %e, "order transition rejected"))?;

        order.version = self.ledger.release_for_order(&order, expected).await?;
        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, reason, "order cancelled");
        Ok(order)
    }

    /// Opens the credentials of a completed order for its buyer.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_download_info(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Vec<DownloadItem>> {
        let order = self.get_order_for_user(order_id, user_id).await?;
        if order.status != OrderStatus::Completed {
            return Err(OrderError::InvalidStateTransition {
                current_state: order.status,
                action: "download",
            }
            .into());
        }

        let mut downloads = Vec::with_capacity(order.items.len());
        for item in order.items {
            let unit = self.ledger.get_unit(item.stock_unit_id).await?;
            let credential = self.ledger.decrypt_credential(&unit)?;
            downloads.push(DownloadItem {
                product_id: item.product_id,
                product_name: item.product_name,
                stock_unit_id: item.stock_unit_id,
                credential,
            });
        }
        Ok(downloads)
    }
}
