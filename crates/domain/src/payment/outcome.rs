//! Gateway verdicts as seen by the payment lifecycle.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownVariant;

/// Final verdict carried by a gateway webhook.
///
/// Gateways send free-form status strings; only these two move a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOutcome {
    Completed,
    Failed,
}

impl GatewayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOutcome::Completed => "COMPLETED",
            GatewayOutcome::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for GatewayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayOutcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" => Ok(GatewayOutcome::Completed),
            "FAILED" => Ok(GatewayOutcome::Failed),
            _ => Err(UnknownVariant::new("gateway status", s)),
        }
    }
}

/// Result of polling the gateway for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    /// No verdict yet.
    Pending,
    Completed,
    Failed,
}

impl GatewayStatus {
    /// The settled verdict, if any.
    pub fn outcome(&self) -> Option<GatewayOutcome> {
        match self {
            GatewayStatus::Pending => None,
            GatewayStatus::Completed => Some(GatewayOutcome::Completed),
            GatewayStatus::Failed => Some(GatewayOutcome::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_statuses() {
        assert_eq!(
            "COMPLETED".parse::<GatewayOutcome>().unwrap(),
            GatewayOutcome::Completed
        );
        assert_eq!("failed".parse::<GatewayOutcome>().unwrap(), GatewayOutcome::Failed);
    }

    #[test]
    fn rejects_everything_else() {
        for raw in ["PENDING", "REFUNDED", "", "success"] {
            assert!(raw.parse::<GatewayOutcome>().is_err(), "{raw}");
        }
    }

    #[test]
    fn polling_status_outcome() {
        assert_eq!(GatewayStatus::Pending.outcome(), None);
        assert_eq!(
            GatewayStatus::Completed.outcome(),
            Some(GatewayOutcome::Completed)
        );
        assert_eq!(GatewayStatus::Failed.outcome(), Some(GatewayOutcome::Failed));
    }
}
