//! Stock units and their available / reserved / sold state machine.

use chrono::{DateTime, Utc};
use common::StockUnitId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::value_objects::ProductId;

/// Derived state of a stock unit at a point in time.
///
/// ```text
/// Available ──reserve──► Reserved ──sell──► Sold
///     ▲                     │
///     └──release / expiry───┘
/// ```
///
/// `Available` also covers a unit whose hold has lapsed but not been swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockState {
    Available,
    Reserved,
    Sold,
}

impl StockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockState::Available => "AVAILABLE",
            StockState::Reserved => "RESERVED",
            StockState::Sold => "SOLD",
        }
    }
}

impl std::fmt::Display for StockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by stock unit transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    /// The unit is not in a state that allows the action.
    #[error("Invalid stock transition: cannot {action} unit {unit_id} in {current_state} state")]
    InvalidStateTransition {
        unit_id: StockUnitId,
        current_state: StockState,
        action: &'static str,
    },
}

/// One sellable credential belonging to a product.
///
/// Invariant: `sold` implies `reserved_until.is_none()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUnit {
    pub id: StockUnitId,
    pub product_id: ProductId,
    /// Encrypted credential payload; only the vault can read it.
    pub credential: String,
    /// Digest of product and plaintext credential, unique per product.
    pub fingerprint: String,
    pub annotation: Option<String>,
    pub sold: bool,
    pub sold_at: Option<DateTime<Utc>>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StockUnit {
    /// Creates a fresh, available unit.
    pub fn new(
        product_id: ProductId,
        credential: String,
        fingerprint: String,
        annotation: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: StockUnitId::new(),
            product_id,
            credential,
            fingerprint,
            annotation,
            sold: false,
            sold_at: None,
            reserved_until: None,
            created_at: now,
        }
    }

    /// Returns the state of the unit at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> StockState {
        if self.sold {
            StockState::Sold
        } else if self.reserved_until.is_some_and(|until| until >= now) {
            StockState::Reserved
        } else {
            StockState::Available
        }
    }

    /// A unit is available iff it is unsold and holds no live reservation.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == StockState::Available
    }

    /// Returns true if the unit carries a hold that lapsed before `now`.
    pub fn has_expired_hold(&self, now: DateTime<Utc>) -> bool {
        !self.sold && self.reserved_until.is_some_and(|until| until < now)
    }

    /// Places a hold until `until`. Only legal on an available unit.
    pub fn reserve(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), StockError> {
        let state = self.state(now);
        if state != StockState::Available {
            return Err(self.invalid(state, "reserve"));
        }
        self.reserved_until = Some(until);
        Ok(())
    }

    /// Clears the hold. Returns false (and changes nothing) if the unit is
    /// sold or holds no reservation.
    pub fn release(&mut self) -> bool {
        if self.sold || self.reserved_until.is_none() {
            return false;
        }
        self.reserved_until = None;
        true
    }

    /// Marks the unit sold. Sale is terminal.
    pub fn sell(&mut self, now: DateTime<Utc>) -> Result<(), StockError> {
        if self.sold {
            return Err(self.invalid(StockState::Sold, "sell"));
        }
        self.sold = true;
        self.sold_at = Some(now);
        self.reserved_until = None;
        Ok(())
    }

    /// Clears a lapsed hold. Returns true if one was cleared.
    pub fn clear_expired_hold(&mut self, now: DateTime<Utc>) -> bool {
        if self.has_expired_hold(now) {
            self.reserved_until = None;
            true
        } else {
            false
        }
    }

    /// Sold and currently reserved units may not be deleted.
    pub fn ensure_deletable(&self, now: DateTime<Utc>) -> Result<(), StockError> {
        match self.state(now) {
            StockState::Available => Ok(()),
            state => Err(self.invalid(state, "delete")),
        }
    }

    fn invalid(&self, current_state: StockState, action: &'static str) -> StockError {
        StockError::InvalidStateTransition {
            unit_id: self.id,
            current_state,
            action,
        }
    }
}

/// Computes the duplicate-detection fingerprint of a plaintext credential.
///
/// The product id is mixed in so the same secret may legitimately exist under
/// two different products.
pub fn credential_fingerprint(product_id: &ProductId, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn unit(now: DateTime<Utc>) -> StockUnit {
        StockUnit::new(
            ProductId::new("SKU-001"),
            "ciphertext".to_string(),
            credential_fingerprint(&ProductId::new("SKU-001"), "secret"),
            None,
            now,
        )
    }

    #[test]
    fn new_unit_is_available() {
        let now = Utc::now();
        let unit = unit(now);
        assert_eq!(unit.state(now), StockState::Available);
        assert!(unit.is_available(now));
    }

    #[test]
    fn reserved_unit_becomes_available_after_hold() {
        let now = Utc::now();
        let mut unit = unit(now);
        let until = now + Duration::minutes(15);
        unit.reserve(until, now).unwrap();

        assert_eq!(unit.state(now), StockState::Reserved);
        assert_eq!(unit.state(until - Duration::seconds(1)), StockState::Reserved);
        assert_eq!(unit.state(until + Duration::seconds(1)), StockState::Available);
        assert!(unit.has_expired_hold(until + Duration::seconds(1)));
    }

    #[test]
    fn cannot_reserve_live_hold() {
        let now = Utc::now();
        let mut unit = unit(now);
        unit.reserve(now + Duration::minutes(5), now).unwrap();

        let err = unit.reserve(now + Duration::minutes(10), now).unwrap_err();
        assert!(matches!(
            err,
            StockError::InvalidStateTransition {
                current_state: StockState::Reserved,
                action: "reserve",
                ..
            }
        ));
    }

    #[test]
    fn lapsed_hold_can_be_reclaimed() {
        let now = Utc::now();
        let mut unit = unit(now);
        unit.reserve(now + Duration::minutes(1), now).unwrap();

        let later = now + Duration::minutes(2);
        unit.reserve(later + Duration::minutes(1), later).unwrap();
        assert_eq!(unit.reserved_until, Some(later + Duration::minutes(1)));
    }

    #[test]
    fn release_is_idempotent() {
        let now = Utc::now();
        let mut unit = unit(now);
        assert!(!unit.release());

        unit.reserve(now + Duration::minutes(5), now).unwrap();
        assert!(unit.release());
        assert!(!unit.release());
        assert!(unit.is_available(now));
    }

    #[test]
    fn sale_is_terminal() {
        let now = Utc::now();
        let mut unit = unit(now);
        unit.reserve(now + Duration::minutes(5), now).unwrap();
        unit.sell(now).unwrap();

        assert!(unit.sold);
        assert_eq!(unit.sold_at, Some(now));
        assert_eq!(unit.reserved_until, None);
        assert_eq!(unit.state(now), StockState::Sold);

        assert!(unit.sell(now).is_err());
        assert!(unit.reserve(now + Duration::minutes(5), now).is_err());
        assert!(!unit.release());
    }

    #[test]
    fn delete_rejected_when_sold_or_reserved() {
        let now = Utc::now();
        let mut unit = unit(now);
        assert!(unit.ensure_deletable(now).is_ok());

        unit.reserve(now + Duration::minutes(5), now).unwrap();
        assert!(unit.ensure_deletable(now).is_err());

        unit.sell(now).unwrap();
        assert!(unit.ensure_deletable(now).is_err());
    }

    #[test]
    fn fingerprint_depends_on_product() {
        let a = credential_fingerprint(&ProductId::new("SKU-001"), "secret");
        let b = credential_fingerprint(&ProductId::new("SKU-002"), "secret");
        assert_ne!(a, b);
        assert_eq!(a, credential_fingerprint(&ProductId::new("SKU-001"), "secret"));
        assert_eq!(a.len(), 64);
    }
}
