//! Reclaims reservations whose hold has lapsed.

use std::sync::Arc;

use chrono::Duration;
use common::Clock;
use domain::StockUnit;
use store::StockStore;

use crate::error::Result;

/// Clears lapsed holds so their units become claimable again.
///
/// A lapsed hold already counts as available, so sweeping is housekeeping:
/// it keeps `reserved_until` meaningful for admin views and the expiring list
/// short.
#[derive(Clone)]
pub struct ExpirationSweeper<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S> ExpirationSweeper<S>
where
    S: StockStore,
{
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Clears every lapsed, unsold hold. Returns how many were cleared.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<u64> {
        let released = self.store.release_expired(self.clock.now()).await?;
        if released > 0 {
            metrics::counter!("stock_reservations_expired_total").increment(released);
            tracing::info!(count = released, "expired reservations released");
        }
        Ok(released)
    }

    /// Units whose hold ends within `within` from now, soonest first.
    pub async fn expiring_reservations(&self, within: Duration) -> Result<Vec<StockUnit>> {
        let now = self.clock.now();
        Ok(self.store.list_expiring(now, now + within).await?)
    }

    /// Units whose hold lapsed and has not been swept yet.
    pub async fn list_expired(&self) -> Result<Vec<StockUnit>> {
        Ok(self.store.list_expired(self.clock.now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::ManualClock;
    use domain::{ProductId, credential_fingerprint};
    use store::InMemoryStore;

    async fn seed(store: &InMemoryStore, count: usize, now: chrono::DateTime<Utc>) {
        let product = ProductId::new("SKU-001");
        let units = (0..count)
            .map(|i| {
                let secret = format!("secret-{i}");
                StockUnit::new(
                    product.clone(),
                    secret.clone(),
                    credential_fingerprint(&product, &secret),
                    None,
                    now,
                )
            })
            .collect();
        store.insert_units(units).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_clears_only_lapsed_holds() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let store = InMemoryStore::new();
        seed(&store, 3, start).await;
        let product = ProductId::new("SKU-001");

        store
            .claim_available(&product, 1, start, start + Duration::minutes(1))
            .await
            .unwrap();
        store
            .claim_available(&product, 1, start, start + Duration::minutes(10))
            .await
            .unwrap();

        let sweeper = ExpirationSweeper::new(store.clone(), Arc::new(clock.clone()));
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
        assert_eq!(
            sweeper.expiring_reservations(Duration::minutes(5)).await.unwrap().len(),
            1
        );

        clock.advance(Duration::minutes(2));
        assert_eq!(sweeper.list_expired().await.unwrap().len(), 1);
        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert!(sweeper.list_expired().await.unwrap().is_empty());
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
    }
}
