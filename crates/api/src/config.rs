//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use booking_store::QueueConfig;
use reservation::{ReservationConfig, RunnerConfig, SweeperConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; unset runs fully in memory
/// - `RECONCILIATION_DELAY_SECS`: unpaid booking lifetime (default: `300`, at most one week)
/// - `PAYMENT_CURRENCY`: currency sent with gateway orders (default: `"INR"`)
/// - `GATEWAY_KEY_SECRET`: key used to verify payment signatures
/// - `GATEWAY_WEBHOOK_SECRET`: key used to verify webhook bodies
/// - `QUEUE_MAX_ATTEMPTS`: deliveries before dead-lettering (default: `5`)
/// - `QUEUE_POLL_INTERVAL_MS`: reconciliation poll period (default: `1000`)
/// - `SWEEP_INTERVAL_SECS`: lifecycle sweep period (default: `60`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub reconciliation_delay: Duration,
    pub currency: String,
    pub gateway_key_secret: String,
    pub gateway_webhook_secret: String,
    pub queue_max_attempts: u32,
    pub queue_poll_interval: Duration,
    pub sweep_interval: Duration,
}

/// Longest unpaid booking lifetime accepted from the environment.
pub const MAX_RECONCILIATION_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            reconciliation_delay: parsed("RECONCILIATION_DELAY_SECS")
                .map(|secs| Duration::from_secs(secs).min(MAX_RECONCILIATION_DELAY))
                .unwrap_or(defaults.reconciliation_delay),
            currency: lookup("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            gateway_key_secret: lookup("GATEWAY_KEY_SECRET")
                .unwrap_or(defaults.gateway_key_secret),
            gateway_webhook_secret: lookup("GATEWAY_WEBHOOK_SECRET")
                .unwrap_or(defaults.gateway_webhook_secret),
            queue_max_attempts: parse_or(lookup("QUEUE_MAX_ATTEMPTS"), defaults.queue_max_attempts)
                .max(1),
            queue_poll_interval: parsed("QUEUE_POLL_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_poll_interval),
            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reservation(&self) -> ReservationConfig {
        ReservationConfig {
            reconciliation_delay: self.reconciliation_delay,
            currency: self.currency.clone(),
        }
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            max_attempts: self.queue_max_attempts,
            ..QueueConfig::default()
        }
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: self.queue_poll_interval,
            ..RunnerConfig::default()
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: self.sweep_interval,
            ..SweeperConfig::default()
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            reconciliation_delay: Duration::from_secs(300),
            currency: "INR".to_string(),
            gateway_key_secret: "test_key_secret".to_string(),
            gateway_webhook_secret: "test_webhook_secret".to_string(),
            queue_max_attempts: 5,
            queue_poll_interval: Duration::from_millis(1000),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.reconciliation_delay, Duration::from_secs(300));
        assert_eq!(config.currency, "INR");
        assert_eq!(config.queue_max_attempts, 5);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/tickets"),
            ("RECONCILIATION_DELAY_SECS", "120"),
            ("QUEUE_MAX_ATTEMPTS", "3"),
            ("QUEUE_POLL_INTERVAL_MS", "250"),
            ("SWEEP_INTERVAL_SECS", "30"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/tickets")
        );
        assert_eq!(config.reservation().reconciliation_delay, Duration::from_secs(120));
        assert_eq!(config.queue().max_attempts, 3);
        assert_eq!(config.runner().poll_interval, Duration::from_millis(250));
        assert_eq!(config.sweeper().interval, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "eighty"),
            ("DATABASE_URL", "  "),
            ("QUEUE_MAX_ATTEMPTS", "0"),
            ("QUEUE_POLL_INTERVAL_MS", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.queue_max_attempts, 1);
        assert_eq!(config.queue_poll_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_reconciliation_delay_is_capped() {
        let huge = (u64::MAX / 2).to_string();
        let config = from_pairs(&[("RECONCILIATION_DELAY_SECS", huge.as_str())]);
        assert_eq!(config.reconciliation_delay, MAX_RECONCILIATION_DELAY);

        let week = from_pairs(&[("RECONCILIATION_DELAY_SECS", "604800")]);
        assert_eq!(week.reconciliation_delay, Duration::from_secs(604_800));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
