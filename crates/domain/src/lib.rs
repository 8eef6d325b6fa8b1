//! Domain layer for the stock fulfillment engine.
//!
//! Pure data and state machines, no I/O:
//! - [`StockUnit`] with its available / reserved / sold lifecycle
//! - [`Order`] and its status machine
//! - [`Payment`] and its status machine, plus gateway verdicts
//! - value objects: [`Money`], [`ProductId`], [`Product`]
//!
//! Every transition takes `now` explicitly so callers decide which clock
//! drives it.

pub mod error;
pub mod order;
pub mod payment;
pub mod stock;
pub mod value_objects;

pub use error::UnknownVariant;
pub use order::{Order, OrderError, OrderItem, OrderStatus};
pub use payment::{
    GatewayOutcome, GatewayStatus, Payment, PaymentError, PaymentMethod, PaymentStatus,
};
pub use stock::{StockError, StockState, StockUnit, credential_fingerprint};
pub use value_objects::{Money, Product, ProductId};
