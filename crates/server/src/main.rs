//! Server entry point.

use std::sync::Arc;

use common::SystemClock;
use fulfillment::{
    AesGcmVault, CredentialVault, FulfillmentEngine, InMemoryCatalog, InMemoryPaymentGateway,
};
use metrics_exporter_prometheus::PrometheusHandle;
use server::config::{Config, LogFormat};
use server::{AppState, catalog};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_vault(config: &Config) -> Arc<dyn CredentialVault> {
    match &config.vault_key {
        Some(key) => {
            Arc::new(AesGcmVault::from_base64_key(key).expect("VAULT_KEY is not a valid key"))
        }
        None => {
            tracing::warn!("VAULT_KEY not set, using an ephemeral key; stored credentials will not survive a restart");
            Arc::new(AesGcmVault::ephemeral())
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Collaborators
    let vault = build_vault(&config);
    let catalog = match &config.catalog_path {
        Some(path) => catalog::load_catalog(path).expect("failed to load catalog"),
        None => {
            tracing::warn!("CATALOG_PATH not set, starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };

    // 4. Pick the store and run
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            run(config, store, catalog, vault, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            run(config, InMemoryStore::new(), catalog, vault, metrics_handle).await;
        }
    }
}

async fn run<S: Store + Clone + 'static>(
    config: Config,
    store: S,
    catalog: InMemoryCatalog,
    vault: Arc<dyn CredentialVault>,
    metrics_handle: PrometheusHandle,
) {
    let engine = FulfillmentEngine::new(
        store,
        catalog,
        InMemoryPaymentGateway::new(),
        vault,
        Arc::new(SystemClock),
        config.fulfillment_settings(),
    );

    let sweepers = server::scheduler::spawn_sweepers(engine.clone(), config.schedule());
    let app = server::create_app(Arc::new(AppState { engine }), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting fulfillment server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    for handle in sweepers {
        handle.abort();
    }
    tracing::info!("server shut down gracefully");
}
