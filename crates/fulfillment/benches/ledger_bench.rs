use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use common::{SystemClock, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Money, Product, ProductId};
use fulfillment::{
    AesGcmVault, FulfillmentEngine, FulfillmentSettings, InMemoryCatalog, InMemoryPaymentGateway,
    NewCredential, StockLedger,
};
use store::InMemoryStore;

fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.add_product(Product::new("SKU-001", "Game key", Money::from_cents(1200), 5));
    catalog
}

fn ledger() -> StockLedger<InMemoryStore, InMemoryCatalog> {
    StockLedger::new(
        InMemoryStore::new(),
        catalog(),
        Arc::new(AesGcmVault::ephemeral()),
        Arc::new(SystemClock),
    )
}

fn credentials(count: usize) -> Vec<NewCredential> {
    (0..count)
        .map(|i| NewCredential::new(format!("KEY-{i:06}")))
        .collect()
}

fn bench_add_stock_batch_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("ledger/add_stock_batch_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = ledger();
                ledger
                    .add_stock(&ProductId::new("SKU-001"), credentials(100))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = ledger();
    let product = ProductId::new("SKU-001");

    // Pre-populate with 1000 units
    rt.block_on(async {
        ledger.add_stock(&product, credentials(1000)).await.unwrap();
    });

    c.bench_function("ledger/reserve_release_1_of_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let units = ledger
                    .reserve(&product, 1, Duration::minutes(15))
                    .await
                    .unwrap();
                ledger.release(units[0].id).await.unwrap();
            });
        });
    });
}

fn bench_create_and_cancel_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = FulfillmentEngine::new(
        InMemoryStore::new(),
        catalog(),
        InMemoryPaymentGateway::new(),
        Arc::new(AesGcmVault::ephemeral()),
        Arc::new(SystemClock),
        FulfillmentSettings::default(),
    );
    let product = ProductId::new("SKU-001");

    rt.block_on(async {
        engine.ledger.add_stock(&product, credentials(100)).await.unwrap();
    });

    c.bench_function("orders/create_and_cancel", |b| {
        b.iter(|| {
            rt.block_on(async {
                let quantities = BTreeMap::from([(product.clone(), 2)]);
                let order = engine
                    .orders
                    .create_order(UserId::new(), quantities)
                    .await
                    .unwrap();
                engine.orders.cancel_order(order.id, "bench").await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_add_stock_batch_100,
    bench_reserve_release,
    bench_create_and_cancel_order,
);
criterion_main!(benches);
