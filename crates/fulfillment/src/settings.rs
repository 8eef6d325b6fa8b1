use chrono::Duration;
use domain::PaymentMethod;

/// Tunables for the fulfillment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentSettings {
    /// How long a reservation made at order creation holds its units.
    pub reservation_ttl_minutes: i64,
    /// Default lifetime of a new payment.
    pub payment_ttl_minutes: i64,
    /// Payment methods accepted by `create_payment`.
    pub enabled_methods: Vec<PaymentMethod>,
}

impl FulfillmentSettings {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::minutes(self.reservation_ttl_minutes)
    }

    pub fn payment_ttl(&self) -> Duration {
        Duration::minutes(self.payment_ttl_minutes)
    }

    pub fn is_enabled(&self, method: PaymentMethod) -> bool {
        self.enabled_methods.contains(&method)
    }
}

impl Default for FulfillmentSettings {
    fn default() -> Self {
        Self {
            reservation_ttl_minutes: 15,
            payment_ttl_minutes: 15,
            enabled_methods: PaymentMethod::ALL.to_vec(),
        }
    }
}
