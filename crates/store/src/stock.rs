use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::StockUnitId;
use domain::{ProductId, StockUnit};

use crate::Result;

/// Result of an attempt to claim units for a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Exactly the requested number of units, now held.
    Claimed(Vec<StockUnit>),
    /// Not enough units; nothing was mutated.
    Insufficient { available: u64 },
}

/// Storage of stock units.
///
/// Every mutating method is a single conditional update: the state check and
/// the write cannot be separated by another writer.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Inserts a batch of new units atomically.
    ///
    /// Fails with `Duplicate` (and inserts nothing) if any `(product,
    /// fingerprint)` pair already exists.
    async fn insert_units(&self, units: Vec<StockUnit>) -> Result<()>;

    async fn get_unit(&self, id: StockUnitId) -> Result<Option<StockUnit>>;

    /// Holds `quantity` available units of `product_id` until `until`.
    ///
    /// Oldest units are claimed first. All or nothing.
    async fn claim_available(
        &self,
        product_id: &ProductId,
        quantity: u32,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Clears the hold on an unsold unit. Returns false if the unit is sold,
    /// unknown, or holds nothing.
    async fn release_unit(&self, id: StockUnitId) -> Result<bool>;

    /// Sells an unsold unit. Returns `None` if it is unknown or already sold.
    async fn mark_sold(&self, id: StockUnitId, now: DateTime<Utc>) -> Result<Option<StockUnit>>;

    /// Clears every hold that lapsed before `now`. Returns how many.
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn count_available(&self, product_id: &ProductId, now: DateTime<Utc>) -> Result<u64>;

    /// Unsold units whose hold ends within `[now, until]`, soonest first.
    async fn list_expiring(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StockUnit>>;

    /// Unsold units whose hold lapsed before `now` and was not swept yet.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<StockUnit>>;

    /// Deletes the unit only if it is available at `now`. Returns false if it
    /// is unknown, sold or held.
    async fn delete_unit(&self, id: StockUnitId, now: DateTime<Utc>) -> Result<bool>;
}
