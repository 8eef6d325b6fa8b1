//! The stock ledger: the only writer of stock unit state.

use std::sync::Arc;

use chrono::Duration;
use common::{Clock, StockUnitId, Version};
use domain::{Order, ProductId, StockError, StockUnit, credential_fingerprint};
use store::{ClaimOutcome, StockSettlement, Store};

use crate::error::{EngineError, Result};
use crate::services::{Catalog, CredentialVault};
use crate::sweeper::ExpirationSweeper;

/// A plaintext credential to load into stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub secret: String,
    pub annotation: Option<String>,
}

impl NewCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

/// Owns the available / reserved / sold state of every stock unit.
///
/// Each mutation is a single conditional update in the store, so two callers
/// can never both win the same unit.
#[derive(Clone)]
pub struct StockLedger<S, C> {
    store: S,
    catalog: C,
    vault: Arc<dyn CredentialVault>,
    clock: Arc<dyn Clock>,
    sweeper: ExpirationSweeper<S>,
}

impl<S, C> StockLedger<S, C>
where
    S: Store + Clone,
    C: Catalog,
{
    pub fn new(
        store: S,
        catalog: C,
        vault: Arc<dyn CredentialVault>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sweeper = ExpirationSweeper::new(store.clone(), clock.clone());
        Self {
            store,
            catalog,
            vault,
            clock,
            sweeper,
        }
    }

    /// Encrypts and stores a batch of credentials for a known product.
    ///
    /// The batch is inserted atomically; a credential already loaded for the
    /// product (or repeated in the batch) rejects all of it.
    #[tracing::instrument(skip(self, credentials), fields(count = credentials.len()))]
    pub async fn add_stock(
        &self,
        product_id: &ProductId,
        credentials: Vec<NewCredential>,
    ) -> Result<Vec<StockUnit>> {
        if credentials.is_empty() {
            return Err(EngineError::Validation(
                "at least one credential is required".to_string(),
            ));
        }
        if self.catalog.get_product(product_id).await?.is_none() {
            return Err(EngineError::not_found("product", product_id));
        }

        let now = self.clock.now();
        let mut units = Vec::with_capacity(credentials.len());
        for credential in credentials {
            let secret = credential.secret.trim();
            if secret.is_empty() {
                return Err(EngineError::Validation(
                    "credential must not be empty".to_string(),
                ));
            }
            let fingerprint = credential_fingerprint(product_id, secret);
            let sealed = self.vault.encrypt(secret)?;
            units.push(StockUnit::new(
                product_id.clone(),
                sealed,
                fingerprint,
                credential.annotation,
                now,
            ));
        }

        self.store
            .insert_units(units.clone())
            .await
            .map_err(|e| match e {
                store::StoreError::Duplicate { detail, .. } => EngineError::AlreadyExists(detail),
                other => other.into(),
            })?;

        metrics::counter!("stock_units_added_total").increment(units.len() as u64);
        tracing::info!(%product_id, count = units.len(), "stock added");
        Ok(units)
    }

    /// Holds exactly `quantity` available units of a product for `ttl`.
    ///
    /// Lapsed holds are swept first. Fails with `InsufficientStock`, and
    /// changes nothing, if fewer units are available.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        ttl: Duration,
    ) -> Result<Vec<StockUnit>> {
        if quantity == 0 {
            return Err(EngineError::Validation(
                "quantity must be greater than 0".to_string(),
            ));
        }
        if ttl <= Duration::zero() {
            return Err(EngineError::Validation(
                "reservation ttl must be positive".to_string(),
            ));
        }

        if let Err(e) = self.sweeper.sweep().await {
            tracing::warn!(error = %e, "sweep before reservation failed");
        }

        let now = self.clock.now();
        match self
            .store
            .claim_available(product_id, quantity, now, now + ttl)
            .await?
        {
            ClaimOutcome::Claimed(units) => {
                metrics::counter!("stock_reservations_total").increment(1);
                tracing::info!(%product_id, count = units.len(), "stock reserved");
                Ok(units)
            }
            ClaimOutcome::Insufficient { available } => {
                metrics::counter!("stock_reservation_failures_total").increment(1);
                tracing::warn!(%product_id, requested = quantity, available, "insufficient stock");
                Err(EngineError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                    available,
                })
            }
        }
    }

    /// Clears the hold on an unsold unit. Returns false if there was nothing
    /// to release.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, unit_id: StockUnitId) -> Result<bool> {
        let released = self.store.release_unit(unit_id).await?;
        if released {
            tracing::info!(%unit_id, "stock released");
        }
        Ok(released)
    }

    /// Sells a unit. Selling a sold unit is a stock-state error.
    #[tracing::instrument(skip(self))]
    pub async fn sell(&self, unit_id: StockUnitId) -> Result<StockUnit> {
        let now = self.clock.now();
        if let Some(unit) = self.store.mark_sold(unit_id, now).await? {
            metrics::counter!("stock_units_sold_total").increment(1);
            tracing::info!(%unit_id, product_id = %unit.product_id, "stock sold");
            return Ok(unit);
        }

        match self.store.get_unit(unit_id).await? {
            Some(unit) => Err(StockError::InvalidStateTransition {
                unit_id,
                current_state: unit.state(now),
                action: "sell",
            }
            .into()),
            None => Err(EngineError::not_found("stock unit", unit_id)),
        }
    }

    pub async fn available_count(&self, product_id: &ProductId) -> Result<u64> {
        Ok(self
            .store
            .count_available(product_id, self.clock.now())
            .await?)
    }

    /// Returns true if fewer units are available than the product's threshold.
    pub async fn is_low_stock(&self, product_id: &ProductId) -> Result<bool> {
        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("product", product_id))?;
        let available = self.available_count(product_id).await?;

        let low = available < u64::from(product.low_stock_threshold);
        if low {
            tracing::warn!(
                %product_id,
                available,
                threshold = product.low_stock_threshold,
                "low stock"
            );
        }
        Ok(low)
    }

    pub async fn get_unit(&self, unit_id: StockUnitId) -> Result<StockUnit> {
        self.store
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| EngineError::not_found("stock unit", unit_id))
    }

    /// Deletes an available unit. Sold and currently held units are kept.
    #[tracing::instrument(skip(self))]
    pub async fn delete_unit(&self, unit_id: StockUnitId) -> Result<()> {
        let now = self.clock.now();
        let unit = self.get_unit(unit_id).await?;
        unit.ensure_deletable(now)?;

        if !self.store.delete_unit(unit_id, now).await? {
            // Claimed or sold between the read and the delete.
            let unit = self.get_unit(unit_id).await?;
            unit.ensure_deletable(self.clock.now())?;
            return Err(EngineError::not_found("stock unit", unit_id));
        }
        tracing::info!(%unit_id, "stock unit deleted");
        Ok(())
    }

    /// Writes `order` (already moved to COMPLETED) and sells every bound unit
    /// in one store transaction. Any unit already sold aborts both.
    pub async fn sell_for_order(&self, order: &Order, expected: Version) -> Result<Version> {
        let unit_ids = order.stock_unit_ids();
        let count = unit_ids.len() as u64;
        let version = self
            .store
            .update_order(order, expected, StockSettlement::Sell(unit_ids))
            .await?;
        metrics::counter!("stock_units_sold_total").increment(count);
        Ok(version)
    }

    /// Writes `order` (already moved to FAILED or CANCELLED) and releases
    /// every bound unit in one store transaction.
    pub async fn release_for_order(&self, order: &Order, expected: Version) -> Result<Version> {
        Ok(self
            .store
            .update_order(
                order,
                expected,
                StockSettlement::Release(order.stock_unit_ids()),
            )
            .await?)
    }

    /// Opens a unit's credential through the vault.
    pub fn decrypt_credential(&self, unit: &StockUnit) -> Result<String> {
        Ok(self.vault.decrypt(&unit.credential)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::ManualClock;
    use domain::{Money, Product, StockState};
    use store::InMemoryStore;

    use crate::services::{AesGcmVault, InMemoryCatalog};

    fn ledger() -> (StockLedger<InMemoryStore, InMemoryCatalog>, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let catalog = InMemoryCatalog::new();
        catalog.add_product(Product::new(
            ProductId::new("SKU-001"),
            "Game key",
            Money::from_cents(1200),
            2,
        ));
        let ledger = StockLedger::new(
            InMemoryStore::new(),
            catalog,
            Arc::new(AesGcmVault::new(&[9u8; 32]).unwrap()),
            Arc::new(clock.clone()),
        );
        (ledger, clock)
    }

    fn sku() -> ProductId {
        ProductId::new("SKU-001")
    }

    async fn stock(ledger: &StockLedger<InMemoryStore, InMemoryCatalog>, count: usize) {
        let credentials = (0..count).map(|i| NewCredential::new(format!("KEY-{i}"))).collect();
        ledger.add_stock(&sku(), credentials).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_stock_encrypts_credentials() {
        let (ledger, _) = ledger();
        let units = ledger
            .add_stock(&sku(), vec![NewCredential::new("KEY-1").with_annotation("region EU")])
            .await
            .unwrap();

        assert_eq!(units.len(), 1);
        assert_ne!(units[0].credential, "KEY-1");
        assert_eq!(units[0].annotation.as_deref(), Some("region EU"));
        assert_eq!(ledger.decrypt_credential(&units[0]).unwrap(), "KEY-1");
    }

    #[tokio::test]
    async fn test_add_stock_rejections() {
        let (ledger, _) = ledger();
        stock(&ledger, 1).await;

        let err = ledger
            .add_stock(&sku(), vec![NewCredential::new("KEY-0")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));

        let err = ledger
            .add_stock(&ProductId::new("NOPE"), vec![NewCredential::new("X")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));

        let err = ledger.add_stock(&sku(), vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = ledger
            .add_stock(&sku(), vec![NewCredential::new("  ")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reserve_all_or_nothing() {
        let (ledger, _) = ledger();
        stock(&ledger, 2).await;

        let err = ledger.reserve(&sku(), 3, Duration::minutes(15)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(ledger.available_count(&sku()).await.unwrap(), 2);

        let units = ledger.reserve(&sku(), 2, Duration::minutes(15)).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(ledger.available_count(&sku()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reserve_rejects_zero_quantity_and_ttl() {
        let (ledger, _) = ledger();
        stock(&ledger, 1).await;

        assert!(matches!(
            ledger.reserve(&sku(), 0, Duration::minutes(1)).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            ledger.reserve(&sku(), 1, Duration::zero()).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (ledger, _) = ledger();
        stock(&ledger, 1).await;
        let units = ledger.reserve(&sku(), 1, Duration::minutes(15)).await.unwrap();

        assert!(ledger.release(units[0].id).await.unwrap());
        assert!(!ledger.release(units[0].id).await.unwrap());
        assert!(!ledger.release(StockUnitId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_sale_is_terminal() {
        let (ledger, _) = ledger();
        stock(&ledger, 1).await;
        let unit = ledger.reserve(&sku(), 1, Duration::minutes(15)).await.unwrap()[0].clone();

        let sold = ledger.sell(unit.id).await.unwrap();
        assert!(sold.sold);
        assert_eq!(sold.reserved_until, None);

        let err = ledger.sell(unit.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Stock(StockError::InvalidStateTransition {
                current_state: StockState::Sold,
                ..
            })
        ));
        assert!(!ledger.release(unit.id).await.unwrap());
        assert!(ledger.reserve(&sku(), 1, Duration::minutes(15)).await.is_err());
        assert_eq!(ledger.available_count(&sku()).await.unwrap(), 0);

        assert!(matches!(
            ledger.sell(StockUnitId::new()).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_reservation_ttl() {
        let (ledger, clock) = ledger();
        stock(&ledger, 1).await;
        ledger.reserve(&sku(), 1, Duration::minutes(1)).await.unwrap();

        clock.advance(Duration::seconds(59));
        assert_eq!(ledger.available_count(&sku()).await.unwrap(), 0);

        clock.advance(Duration::seconds(2));
        assert_eq!(ledger.available_count(&sku()).await.unwrap(), 1);
        assert_eq!(ledger.reserve(&sku(), 1, Duration::minutes(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_low_stock() {
        let (ledger, _) = ledger();
        stock(&ledger, 2).await;
        assert!(!ledger.is_low_stock(&sku()).await.unwrap());

        ledger.reserve(&sku(), 1, Duration::minutes(15)).await.unwrap();
        assert!(ledger.is_low_stock(&sku()).await.unwrap());

        assert!(matches!(
            ledger.is_low_stock(&ProductId::new("NOPE")).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_unit_rules() {
        let (ledger, _) = ledger();
        stock(&ledger, 2).await;
        let held = ledger.reserve(&sku(), 1, Duration::minutes(15)).await.unwrap()[0].clone();

        let err = ledger.delete_unit(held.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Stock(_)));

        let units = ledger.reserve(&sku(), 1, Duration::minutes(15)).await.unwrap();
        ledger.release(units[0].id).await.unwrap();
        ledger.delete_unit(units[0].id).await.unwrap();
        assert!(matches!(
            ledger.get_unit(units[0].id).await,
            Err(EngineError::NotFound { .. })
        ));

        ledger.sell(held.id).await.unwrap();
        assert!(ledger.delete_unit(held.id).await.is_err());
    }
}
