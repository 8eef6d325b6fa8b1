//! Backing store for the fulfillment engine.
//!
//! The traits expose conditional-update primitives; implementations guarantee
//! that each one is atomic. [`InMemoryStore`] keeps everything behind one lock
//! and is what the tests and a database-less deployment use;
//! [`PostgresStore`] is the production implementation.

pub mod error;
pub mod memory;
pub mod orders;
pub mod payments;
pub mod postgres;
pub mod stock;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use orders::{OrderStore, StockSettlement};
pub use payments::PaymentStore;
pub use postgres::PostgresStore;
pub use stock::{ClaimOutcome, StockStore};

/// Everything the engine needs from a store.
pub trait Store: StockStore + OrderStore + PaymentStore {}

impl<T: StockStore + OrderStore + PaymentStore + ?Sized> Store for T {}
