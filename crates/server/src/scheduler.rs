//! Periodic background jobs.

use std::future::Future;
use std::time::Duration;

use fulfillment::{Catalog, FulfillmentEngine, PaymentGateway};
use store::Store;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How often each background job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub sweep_interval: Duration,
    pub payment_expiry_interval: Duration,
    pub reconcile_interval: Duration,
}

/// Starts the reservation sweep, payment expiry and reconciliation loops.
///
/// Each loop logs a failed tick and keeps going. Abort the returned handles
/// to stop them.
pub fn spawn_sweepers<S, C, G>(
    engine: FulfillmentEngine<S, C, G>,
    schedule: Schedule,
) -> Vec<JoinHandle<()>>
where
    S: Store + Clone + 'static,
    C: Catalog + Clone + 'static,
    G: PaymentGateway + Clone + 'static,
{
    let sweeper = engine.sweeper.clone();
    let expiry = engine.payments.clone();
    let reconciler = engine.payments;

    vec![
        spawn_periodic("reservation_sweep", schedule.sweep_interval, move || {
            let sweeper = sweeper.clone();
            async move { sweeper.sweep().await.map(drop) }
        }),
        spawn_periodic("payment_expiry", schedule.payment_expiry_interval, move || {
            let payments = expiry.clone();
            async move { payments.process_expired_payments().await.map(drop) }
        }),
        spawn_periodic("reconciliation", schedule.reconcile_interval, move || {
            let payments = reconciler.clone();
            async move { payments.reconcile_completed_payments().await.map(drop) }
        }),
    ]
}

fn spawn_periodic<F, Fut>(task: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = fulfillment::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = job().await {
                metrics::counter!("scheduled_job_failures_total").increment(1);
                tracing::warn!(task, error = %e, "scheduled job failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use common::ManualClock;
    use domain::{Money, Product, ProductId};
    use fulfillment::{
        AesGcmVault, FulfillmentSettings, InMemoryCatalog, InMemoryPaymentGateway, NewCredential,
    };
    use store::InMemoryStore;

    #[tokio::test]
    async fn test_sweep_loop_reclaims_lapsed_holds() {
        let clock = ManualClock::new(Utc::now());
        let catalog = InMemoryCatalog::new();
        catalog.add_product(Product::new("SKU-001", "Game key", Money::from_cents(1200), 1));
        let engine = FulfillmentEngine::new(
            InMemoryStore::new(),
            catalog,
            InMemoryPaymentGateway::new(),
            Arc::new(AesGcmVault::ephemeral()),
            Arc::new(clock.clone()),
            FulfillmentSettings::default(),
        );

        let product = ProductId::new("SKU-001");
        engine
            .ledger
            .add_stock(&product, vec![NewCredential::new("KEY-1")])
            .await
            .unwrap();
        engine
            .ledger
            .reserve(&product, 1, chrono::Duration::minutes(1))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(engine.sweeper.list_expired().await.unwrap().len(), 1);

        let handles = spawn_sweepers(
            engine.clone(),
            Schedule {
                sweep_interval: Duration::from_millis(10),
                payment_expiry_interval: Duration::from_millis(10),
                reconcile_interval: Duration::from_millis(10),
            },
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        for handle in &handles {
            handle.abort();
        }

        assert!(engine.sweeper.list_expired().await.unwrap().is_empty());
        assert_eq!(engine.ledger.available_count(&product).await.unwrap(), 1);
    }
}
