//! Engine error types.

use domain::{OrderError, PaymentError, ProductId, StockError};
use store::StoreError;
use thiserror::Error;

use crate::services::{CatalogError, GatewayError, VaultError};

/// Errors surfaced by the fulfillment engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Fewer units are available than requested. Nothing was reserved.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u64,
    },

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The caller does not own the resource.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A gateway callback could not be applied.
    #[error("Webhook processing failed: {0}")]
    WebhookProcessing(String),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse classification of an [`EngineError`], used to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InsufficientStock,
    InvalidStateTransition,
    Unauthorized,
    AlreadyExists,
    Validation,
    WebhookProcessing,
    Decryption,
    Gateway,
    Internal,
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns the kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            EngineError::Stock(StockError::InvalidStateTransition { .. }) => {
                ErrorKind::InvalidStateTransition
            }
            EngineError::Order(err) => match err {
                OrderError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
                OrderError::InvalidQuantity { .. } | OrderError::NoItems => ErrorKind::Validation,
            },
            EngineError::Payment(err) => match err {
                PaymentError::InvalidStateTransition { .. }
                | PaymentError::TransactionMismatch { .. } => ErrorKind::InvalidStateTransition,
                _ => ErrorKind::Validation,
            },
            EngineError::Unauthorized(_) => ErrorKind::Unauthorized,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::WebhookProcessing(_) => ErrorKind::WebhookProcessing,
            EngineError::Vault(VaultError::Decryption(_)) => ErrorKind::Decryption,
            EngineError::Vault(_) => ErrorKind::Internal,
            EngineError::Gateway(_) => ErrorKind::Gateway,
            EngineError::Catalog(_) => ErrorKind::Internal,
            EngineError::Store(err) => match err {
                StoreError::ConcurrencyConflict { .. } | StoreError::StockConflict { .. } => {
                    ErrorKind::InvalidStateTransition
                }
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::Duplicate { .. } => ErrorKind::AlreadyExists,
                _ => ErrorKind::Internal,
            },
        }
    }

    /// Returns true if a store compare-and-set lost a race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::Store(StoreError::ConcurrencyConflict { .. })
        )
    }

    /// Returns true if stock bound to an order was already sold.
    pub fn is_stock_conflict(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::StockConflict { .. }))
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::Version;
    use domain::{OrderStatus, PaymentStatus};

    #[test]
    fn test_kinds() {
        let err = EngineError::Order(OrderError::InvalidStateTransition {
            current_state: OrderStatus::Cancelled,
            action: "cancel",
        });
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        let err = EngineError::Payment(PaymentError::RefundExceedsAmount {
            requested: domain::Money::from_cents(2),
            paid: domain::Money::from_cents(1),
        });
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = EngineError::Payment(PaymentError::InvalidStateTransition {
            current_state: PaymentStatus::Refunded,
            action: "refund",
        });
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        let err = EngineError::Vault(VaultError::Decryption("bad tag".into()));
        assert_eq!(err.kind(), ErrorKind::Decryption);
        assert_eq!(
            EngineError::Vault(VaultError::InvalidKey("short".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_store_error_kinds() {
        let conflict = EngineError::Store(StoreError::ConcurrencyConflict {
            entity: "order",
            id: "x".into(),
            expected: Version::first(),
        });
        assert_eq!(conflict.kind(), ErrorKind::InvalidStateTransition);
        assert!(conflict.is_conflict());

        let duplicate = EngineError::Store(StoreError::Duplicate {
            entity: "payment",
            detail: "active payment".into(),
        });
        assert_eq!(duplicate.kind(), ErrorKind::AlreadyExists);
        assert!(!duplicate.is_conflict());

        let down = EngineError::Store(StoreError::Unavailable("down".into()));
        assert_eq!(down.kind(), ErrorKind::Internal);

        let sold = EngineError::Store(StoreError::StockConflict {
            unit_ids: vec![common::StockUnitId::new()],
        });
        assert_eq!(sold.kind(), ErrorKind::InvalidStateTransition);
        assert!(sold.is_stock_conflict());
        assert!(!sold.is_conflict());
        assert!(!conflict.is_stock_conflict());
    }

    #[test]
    fn test_message() {
        let err = EngineError::InsufficientStock {
            product_id: ProductId::new("SKU-001"),
            requested: 3,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SKU-001: requested 3, available 1"
        );
    }
}
