//! Shared types for the stock fulfillment engine.

pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{OrderId, PaymentId, StockUnitId, UserId, Version};
