use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, StockUnitId, UserId, Version};
use domain::{Order, Payment, PaymentStatus, ProductId, StockUnit};
use tokio::sync::RwLock;

use crate::{
    ClaimOutcome, OrderStore, PaymentStore, Result, StockSettlement, StockStore, StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    units: HashMap<StockUnitId, StockUnit>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    fail_on_insert_order: bool,
    fail_on_update_order: bool,
}

impl Tables {
    fn available_units(&self, product_id: &ProductId, now: DateTime<Utc>) -> Vec<StockUnitId> {
        let mut units: Vec<&StockUnit> = self
            .units
            .values()
            .filter(|u| &u.product_id == product_id && u.is_available(now))
            .collect();
        units.sort_by_key(|u| (u.created_at, u.id));
        units.into_iter().map(|u| u.id).collect()
    }
}

/// In-memory store for tests and database-less deployments.
///
/// All tables share one lock, so every conditional update runs as a single
/// critical section under the write guard.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `insert_order` fail until reset.
    pub async fn set_fail_on_insert_order(&self, fail: bool) {
        self.tables.write().await.fail_on_insert_order = fail;
    }

    /// Makes `update_order` fail until reset.
    pub async fn set_fail_on_update_order(&self, fail: bool) {
        self.tables.write().await.fail_on_update_order = fail;
    }

    /// Returns the total number of stock units stored.
    pub async fn unit_count(&self) -> usize {
        self.tables.read().await.units.len()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn insert_units(&self, units: Vec<StockUnit>) -> Result<()> {
        let mut tables = self.tables.write().await;

        let mut seen: Vec<(&ProductId, &str)> = Vec::with_capacity(units.len());
        for unit in &units {
            let key = (&unit.product_id, unit.fingerprint.as_str());
            let exists = tables
                .units
                .values()
                .any(|u| u.product_id == unit.product_id && u.fingerprint == unit.fingerprint);
            if exists || seen.contains(&key) {
                return Err(StoreError::Duplicate {
                    entity: "stock unit",
                    detail: format!("credential already loaded for product {}", unit.product_id),
                });
            }
            seen.push(key);
        }

        for unit in units {
            tables.units.insert(unit.id, unit);
        }
        Ok(())
    }

    async fn get_unit(&self, id: StockUnitId) -> Result<Option<StockUnit>> {
        Ok(self.tables.read().await.units.get(&id).cloned())
    }

    async fn claim_available(
        &self,
        product_id: &ProductId,
        quantity: u32,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut tables = self.tables.write().await;

        let candidates = tables.available_units(product_id, now);
        if candidates.len() < quantity as usize {
            return Ok(ClaimOutcome::Insufficient {
                available: candidates.len() as u64,
            });
        }

        let mut claimed = Vec::with_capacity(quantity as usize);
        for id in candidates.into_iter().take(quantity as usize) {
            if let Some(unit) = tables.units.get_mut(&id)
                && unit.reserve(until, now).is_ok()
            {
                claimed.push(unit.clone());
            }
        }
        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn release_unit(&self, id: StockUnitId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.units.get_mut(&id).is_some_and(|u| u.release()))
    }

    async fn mark_sold(&self, id: StockUnitId, now: DateTime<Utc>) -> Result<Option<StockUnit>> {
        let mut tables = self.tables.write().await;
        match tables.units.get_mut(&id) {
            Some(unit) => Ok(unit.sell(now).is_ok().then(|| unit.clone())),
            None => Ok(None),
        }
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let cleared = tables
            .units
            .values_mut()
            .map(|u| u.clear_expired_hold(now))
            .filter(|cleared| *cleared)
            .count();
        Ok(cleared as u64)
    }

    async fn count_available(&self, product_id: &ProductId, now: DateTime<Utc>) -> Result<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .units
            .values()
            .filter(|u| &u.product_id == product_id && u.is_available(now))
            .count();
        Ok(count as u64)
    }

    async fn list_expiring(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StockUnit>> {
        let tables = self.tables.read().await;
        let mut units: Vec<StockUnit> = tables
            .units
            .values()
            .filter(|u| {
                !u.sold
                    && u
                        .reserved_until
                        .is_some_and(|held| held >= now && held <= until)
            })
            .cloned()
            .collect();
        units.sort_by_key(|u| (u.reserved_until, u.id));
        Ok(units)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<StockUnit>> {
        let tables = self.tables.read().await;
        let mut units: Vec<StockUnit> = tables
            .units
            .values()
            .filter(|u| u.has_expired_hold(now))
            .cloned()
            .collect();
        units.sort_by_key(|u| (u.reserved_until, u.id));
        Ok(units)
    }

    async fn delete_unit(&self, id: StockUnitId, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let deletable = tables
            .units
            .get(&id)
            .is_some_and(|u| u.ensure_deletable(now).is_ok());
        if deletable {
            tables.units.remove(&id);
        }
        Ok(deletable)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.fail_on_insert_order {
            return Err(StoreError::Unavailable("order insert disabled".to_string()));
        }
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate {
                entity: "order",
                detail: order.id.to_string(),
            });
        }

        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_order(
        &self,
        order: &Order,
        expected: Version,
        settlement: StockSettlement,
    ) -> Result<Version> {
        let mut tables = self.tables.write().await;

        if tables.fail_on_update_order {
            return Err(StoreError::Unavailable("order update disabled".to_string()));
        }

        let current = tables
            .orders
            .get(&order.id)
            .map(|o| o.version)
            .ok_or_else(|| StoreError::not_found("order", order.id))?;
        if current != expected {
            return Err(StoreError::conflict("order", order.id, expected));
        }

        let now = order.updated_at;
        match &settlement {
            StockSettlement::None => {}
            StockSettlement::Sell(ids) => {
                let unsellable: Vec<StockUnitId> = ids
                    .iter()
                    .filter(|id| tables.units.get(*id).is_none_or(|u| u.sold))
                    .copied()
                    .collect();
                if !unsellable.is_empty() {
                    return Err(StoreError::StockConflict {
                        unit_ids: unsellable,
                    });
                }
                for id in ids {
                    if let Some(unit) = tables.units.get_mut(id) {
                        unit.sell(now).map_err(|_| StoreError::StockConflict {
                            unit_ids: vec![*id],
                        })?;
                    }
                }
            }
            StockSettlement::Release(ids) => {
                for id in ids {
                    if let Some(unit) = tables.units.get_mut(id) {
                        unit.release();
                    }
                }
            }
        }

        let new_version = expected.next();
        let mut stored = order.clone();
        stored.version = new_version;
        tables.orders.insert(order.id, stored);
        Ok(new_version)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;

        let has_active = tables
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id && p.status.is_active());
        if has_active {
            return Err(StoreError::Duplicate {
                entity: "payment",
                detail: format!("order {} already has an active payment", payment.order_id),
            });
        }

        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn find_active_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.order_id == order_id && p.status.is_active())
            .cloned())
    }

    async fn update_payment(&self, payment: &Payment, expected: Version) -> Result<Version> {
        let mut tables = self.tables.write().await;

        let stored = tables
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| StoreError::not_found("payment", payment.id))?;
        if stored.version != expected {
            return Err(StoreError::conflict("payment", payment.id, expected));
        }

        let new_version = expected.next();
        *stored = payment.clone();
        stored.version = new_version;
        Ok(new_version)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.is_expired(now))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.expires_at);
        Ok(payments)
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}
