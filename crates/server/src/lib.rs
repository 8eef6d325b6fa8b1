//! Operational shell for the fulfillment engine.
//!
//! Serves health and Prometheus endpoints, receives payment gateway webhooks
//! and runs the periodic sweepers.

pub mod catalog;
pub mod config;
pub mod error;
pub mod routes;
pub mod scheduler;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::{FulfillmentEngine, InMemoryCatalog, InMemoryPaymentGateway};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Engine as wired by the binary.
pub type Engine<S> = FulfillmentEngine<S, InMemoryCatalog, InMemoryPaymentGateway>;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub engine: Engine<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/webhooks/payments", post(routes::webhooks::payment::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
