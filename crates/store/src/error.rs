use common::{StockUnitId, Version};
use thiserror::Error;

/// Errors that can occur when interacting with the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-set write lost: the row moved past the expected version.
    #[error("Concurrency conflict for {entity} {id}: expected version {expected}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: Version,
    },

    /// The row to update does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness rule rejected the write.
    #[error("Duplicate {entity}: {detail}")]
    Duplicate { entity: &'static str, detail: String },

    /// Stock units could not be settled because they were already sold.
    #[error("Stock conflict: {} unit(s) already sold", .unit_ids.len())]
    StockConflict { unit_ids: Vec<StockUnitId> },

    /// A stored value could not be mapped back onto the domain model.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The store refused the operation (used by the in-memory store's
    /// failure toggles).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(entity: &'static str, id: impl ToString, expected: Version) -> Self {
        StoreError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
            expected,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
