use std::time::Duration;

/// Settings for the reservation workflow.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// How long a booking may stay unpaid before it is failed.
    pub reconciliation_delay: Duration,
    /// ISO currency code sent with gateway orders.
    pub currency: String,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            reconciliation_delay: Duration::from_secs(300),
            currency: "INR".to_string(),
        }
    }
}

impl ReservationConfig {
    /// The reconciliation delay as a wall-clock offset.
    pub fn reconciliation_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.reconciliation_delay)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
    }
}
