//! Stock reservation and fulfillment engine.
//!
//! Sells a finite pool of pre-provisioned credentials so that every unit goes
//! to exactly one buyer:
//!
//! - [`StockLedger`]: the only writer of stock unit state
//! - [`ExpirationSweeper`]: reclaims lapsed holds
//! - [`ReservationCoordinator`]: all-or-nothing claims across products
//! - [`OrderService`]: the order status machine and its stock settlement
//! - [`PaymentCoordinator`]: the payment status machine, webhooks, refunds
//!   and reconciliation
//!
//! [`FulfillmentEngine`] wires them over one [`store::Store`].

pub mod engine;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod payments;
pub mod reservation;
pub mod services;
pub mod settings;
pub mod sweeper;

pub use engine::FulfillmentEngine;
pub use error::{EngineError, ErrorKind, Result};
pub use ledger::{NewCredential, StockLedger};
pub use orders::{DownloadItem, OrderService};
pub use payments::{PaymentCoordinator, ReconciliationReport, WebhookOutcome};
pub use reservation::{ReservationCoordinator, ReservedStock};
pub use services::{
    AesGcmVault, Catalog, CatalogError, CredentialVault, GatewayError, GatewayInitiation,
    InMemoryCatalog, InMemoryPaymentGateway, PaymentGateway, VaultError,
};
pub use settings::FulfillmentSettings;
pub use sweeper::ExpirationSweeper;
