//! Integration tests for the HTTP shell.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{ManualClock, UserId};
use domain::{Money, Product, ProductId};
use fulfillment::{
    AesGcmVault, FulfillmentEngine, FulfillmentSettings, InMemoryCatalog, InMemoryPaymentGateway,
    NewCredential,
};
use metrics_exporter_prometheus::PrometheusHandle;
use server::{AppState, Engine};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Engine<InMemoryStore>) {
    let catalog = InMemoryCatalog::new();
    catalog.add_product(Product::new("SKU-001", "Game key", Money::from_cents(1200), 1));

    let engine = FulfillmentEngine::new(
        InMemoryStore::new(),
        catalog,
        InMemoryPaymentGateway::new(),
        Arc::new(AesGcmVault::ephemeral()),
        Arc::new(ManualClock::default()),
        FulfillmentSettings::default(),
    );
    let state = Arc::new(AppState {
        engine: engine.clone(),
    });
    (server::create_app(state, get_metrics_handle()), engine)
}

/// Stocks one unit, orders it and sends the payment to the gateway.
/// Returns the gateway transaction id.
async fn initiated_payment(engine: &Engine<InMemoryStore>) -> String {
    let product = ProductId::new("SKU-001");
    engine
        .ledger
        .add_stock(&product, vec![NewCredential::new("KEY-1")])
        .await
        .unwrap();
    let order = engine
        .orders
        .create_order(UserId::new(), [(product, 1)].into_iter().collect())
        .await
        .unwrap();
    let payment = engine
        .payments
        .create_payment(order.id, "CARD", None)
        .await
        .unwrap();
    engine
        .payments
        .initiate_payment(payment.id)
        .await
        .unwrap()
        .transaction_id
        .unwrap()
}

fn webhook(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_webhook_applies_then_reports_duplicate() {
    let (app, engine) = setup();
    let transaction_id = initiated_payment(&engine).await;

    let body = serde_json::json!({
        "transaction_id": transaction_id,
        "status": "COMPLETED",
        "gateway_response": {"auth_code": "A1"}
    });

    let response = app.clone().oneshot(webhook(body.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["outcome"], "applied");
    assert_eq!(json["payment_status"], "COMPLETED");

    let response = app.oneshot(webhook(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["outcome"], "duplicate");
    assert_eq!(json["payment_status"], "COMPLETED");
}

#[tokio::test]
async fn test_webhook_unmapped_status() {
    let (app, engine) = setup();
    let transaction_id = initiated_payment(&engine).await;

    let response = app
        .oneshot(webhook(serde_json::json!({
            "transaction_id": transaction_id,
            "status": "REVERSED"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().contains("REVERSED"));
}

#[tokio::test]
async fn test_webhook_unknown_transaction() {
    let (app, _) = setup();

    let response = app
        .oneshot(webhook(serde_json::json!({
            "transaction_id": "TXN-9999",
            "status": "COMPLETED"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_contradicting_verdict_conflicts() {
    let (app, engine) = setup();
    let transaction_id = initiated_payment(&engine).await;

    let failed = app
        .clone()
        .oneshot(webhook(serde_json::json!({
            "transaction_id": transaction_id,
            "status": "failed"
        })))
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::OK);

    let response = app
        .oneshot(webhook(serde_json::json!({
            "transaction_id": transaction_id,
            "status": "COMPLETED"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_webhook_requires_transaction_id() {
    let (app, _) = setup();

    let response = app
        .oneshot(webhook(serde_json::json!({
            "transaction_id": "  ",
            "status": "COMPLETED"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
