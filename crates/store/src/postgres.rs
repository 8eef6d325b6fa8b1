use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, StockUnitId, UserId, Version};
use domain::{
    Money, Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus, ProductId,
    StockUnit,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ClaimOutcome, OrderStore, PaymentStore, Result, StockSettlement, StockStore, StoreError,
};

const UNIT_FINGERPRINT_KEY: &str = "stock_units_product_fingerprint_key";
const ONE_ACTIVE_PAYMENT_KEY: &str = "payments_one_active_per_order";

const ORDER_COLUMNS: &str = "id, user_id, order_number, total_amount, status, status_reason, \
                             version, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, amount, method, status, reference, qr_payload, \
                               transaction_id, gateway_response, failure_reason, refund_amount, \
                               refund_reason, expires_at, version, created_at, updated_at";

/// PostgreSQL-backed store.
///
/// Time is always passed in by the caller; no statement reads `now()`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_unit(row: &PgRow) -> Result<StockUnit> {
        Ok(StockUnit {
            id: StockUnitId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            credential: row.try_get("credential")?,
            fingerprint: row.try_get("fingerprint")?,
            annotation: row.try_get("annotation")?,
            sold: row.try_get("sold")?,
            sold_at: row.try_get("sold_at")?,
            reserved_until: row.try_get("reserved_until")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            product_name: row.try_get("product_name")?,
            unit_price: Money::from_cents(row.try_get("unit_price")?),
            stock_unit_id: StockUnitId::from_uuid(row.try_get::<Uuid, _>("stock_unit_id")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            order_number: row.try_get("order_number")?,
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            status: parse_column::<OrderStatus>(row, "status")?,
            status_reason: row.try_get("status_reason")?,
            items,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount")?),
            method: parse_column::<PaymentMethod>(row, "method")?,
            status: parse_column::<PaymentStatus>(row, "status")?,
            reference: row.try_get("reference")?,
            qr_payload: row.try_get("qr_payload")?,
            transaction_id: row.try_get("transaction_id")?,
            gateway_response: row.try_get("gateway_response")?,
            failure_reason: row.try_get("failure_reason")?,
            refund_amount: row
                .try_get::<Option<i64>, _>("refund_amount")?
                .map(Money::from_cents),
            refund_reason: row.try_get("refund_reason")?,
            expires_at: row.try_get("expires_at")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Loads the items of every listed order, grouped by order.
    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, unit_price, stock_unit_id
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    async fn hydrate_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn apply_settlement(
        tx: &mut Transaction<'_, Postgres>,
        settlement: &StockSettlement,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match settlement {
            StockSettlement::None => Ok(()),
            StockSettlement::Sell(ids) => {
                let wanted: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
                let sold: Vec<Uuid> = sqlx::query_scalar(
                    r#"
                    UPDATE stock_units
                    SET sold = TRUE, sold_at = $2, reserved_until = NULL
                    WHERE id = ANY($1) AND NOT sold
                    RETURNING id
                    "#,
                )
                .bind(&wanted)
                .bind(now)
                .fetch_all(&mut **tx)
                .await?;

                if sold.len() != wanted.len() {
                    let unit_ids = wanted
                        .into_iter()
                        .filter(|id| !sold.contains(id))
                        .map(StockUnitId::from_uuid)
                        .collect();
                    return Err(StoreError::StockConflict { unit_ids });
                }
                Ok(())
            }
            StockSettlement::Release(ids) => {
                let wanted: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
                sqlx::query(
                    r#"
                    UPDATE stock_units
                    SET reserved_until = NULL
                    WHERE id = ANY($1) AND NOT sold
                    "#,
                )
                .bind(&wanted)
                .execute(&mut **tx)
                .await?;
                Ok(())
            }
        }
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::InvalidRow(format!("{column}: {e}")))
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

#[async_trait]
impl StockStore for PostgresStore {
    async fn insert_units(&self, units: Vec<StockUnit>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for unit in &units {
            sqlx::query(
                r#"
                INSERT INTO stock_units (id, product_id, credential, fingerprint, annotation, sold, sold_at, reserved_until, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(unit.id.as_uuid())
            .bind(unit.product_id.as_str())
            .bind(&unit.credential)
            .bind(&unit.fingerprint)
            .bind(&unit.annotation)
            .bind(unit.sold)
            .bind(unit.sold_at)
            .bind(unit.reserved_until)
            .bind(unit.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e, UNIT_FINGERPRINT_KEY) {
                    return StoreError::Duplicate {
                        entity: "stock unit",
                        detail: format!("credential already loaded for product {}", unit.product_id),
                    };
                }
                StoreError::Database(e)
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_unit(&self, id: StockUnitId) -> Result<Option<StockUnit>> {
        let row = sqlx::query("SELECT * FROM stock_units WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_unit).transpose()
    }

    async fn claim_available(
        &self,
        product_id: &ProductId,
        quantity: u32,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        // Rows locked by a concurrent claim are skipped, not waited on.
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM stock_units
                WHERE product_id = $1
                  AND NOT sold
                  AND (reserved_until IS NULL OR reserved_until < $2)
                ORDER BY created_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE stock_units s
            SET reserved_until = $4
            FROM claimable
            WHERE s.id = claimable.id
            RETURNING s.*
            "#,
        )
        .bind(product_id.as_str())
        .bind(now)
        .bind(i64::from(quantity))
        .bind(until)
        .fetch_all(&mut *tx)
        .await?;

        if rows.len() < quantity as usize {
            tx.rollback().await?;
            tracing::debug!(
                product_id = %product_id,
                requested = quantity,
                claimable = rows.len(),
                "Claim rolled back"
            );
            return Ok(ClaimOutcome::Insufficient {
                available: rows.len() as u64,
            });
        }

        tx.commit().await?;

        let mut units = rows
            .iter()
            .map(Self::row_to_unit)
            .collect::<Result<Vec<_>>>()?;
        units.sort_by_key(|u| (u.created_at, u.id));
        Ok(ClaimOutcome::Claimed(units))
    }

    async fn release_unit(&self, id: StockUnitId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stock_units
            SET reserved_until = NULL
            WHERE id = $1 AND NOT sold AND reserved_until IS NOT NULL
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_sold(&self, id: StockUnitId, now: DateTime<Utc>) -> Result<Option<StockUnit>> {
        let row = sqlx::query(
            r#"
            UPDATE stock_units
            SET sold = TRUE, sold_at = $2, reserved_until = NULL
            WHERE id = $1 AND NOT sold
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_unit).transpose()
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_units
            SET reserved_until = NULL
            WHERE NOT sold AND reserved_until < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_available(&self, product_id: &ProductId, now: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stock_units
            WHERE product_id = $1
              AND NOT sold
              AND (reserved_until IS NULL OR reserved_until < $2)
            "#,
        )
        .bind(product_id.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_expiring(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StockUnit>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stock_units
            WHERE NOT sold AND reserved_until BETWEEN $1 AND $2
            ORDER BY reserved_until, id
            "#,
        )
        .bind(now)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_unit).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<StockUnit>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stock_units
            WHERE NOT sold AND reserved_until < $1
            ORDER BY reserved_until, id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_unit).collect()
    }

    async fn delete_unit(&self, id: StockUnitId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM stock_units
            WHERE id = $1
              AND NOT sold
              AND (reserved_until IS NULL OR reserved_until < $2)
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, order_number, total_amount, status, status_reason, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.order_number)
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(&order.status_reason)
        .bind(order.version.as_i64())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::Duplicate {
                    entity: "order",
                    detail: order.id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, product_name, unit_price, stock_unit_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.product_id.as_str())
            .bind(&item.product_name)
            .bind(item.unit_price.cents())
            .bind(item.stock_unit_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate_orders(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_orders(rows).await
    }

    async fn update_order(
        &self,
        order: &Order,
        expected: Version,
        settlement: StockSettlement,
    ) -> Result<Version> {
        let new_version = expected.next();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, status_reason = $3, version = $4, updated_at = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(&order.status_reason)
        .bind(new_version.as_i64())
        .bind(order.updated_at)
        .bind(expected.as_i64())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Err(match exists {
                Some(_) => StoreError::conflict("order", order.id, expected),
                None => StoreError::not_found("order", order.id),
            });
        }

        if let Err(e) = Self::apply_settlement(&mut tx, &settlement, order.updated_at).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;
        Ok(new_version)
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, method, status, reference, qr_payload, transaction_id,
                                  gateway_response, failure_reason, refund_amount, refund_reason, expires_at,
                                  version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.cents())
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.reference)
        .bind(&payment.qr_payload)
        .bind(&payment.transaction_id)
        .bind(&payment.gateway_response)
        .bind(&payment.failure_reason)
        .bind(payment.refund_amount.map(|m| m.cents()))
        .bind(&payment.refund_reason)
        .bind(payment.expires_at)
        .bind(payment.version.as_i64())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, ONE_ACTIVE_PAYMENT_KEY) {
                return StoreError::Duplicate {
                    entity: "payment",
                    detail: format!("order {} already has an active payment", payment.order_id),
                };
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn find_active_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 AND status <> 'CANCELLED'"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn update_payment(&self, payment: &Payment, expected: Version) -> Result<Version> {
        let new_version = expected.next();

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, transaction_id = $3, gateway_response = $4, failure_reason = $5,
                refund_amount = $6, refund_reason = $7, version = $8, updated_at = $9
            WHERE id = $1 AND version = $10
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.gateway_response)
        .bind(&payment.failure_reason)
        .bind(payment.refund_amount.map(|m| m.cents()))
        .bind(&payment.refund_reason)
        .bind(new_version.as_i64())
        .bind(payment.updated_at)
        .bind(expected.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.get_payment(payment.id).await? {
                Some(_) => StoreError::conflict("payment", payment.id, expected),
                None => StoreError::not_found("payment", payment.id),
            });
        }

        Ok(new_version)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status IN ('PENDING', 'PROCESSING') AND expires_at < $1 \
             ORDER BY expires_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_payment).collect()
    }
}
