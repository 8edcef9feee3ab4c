use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::services::RetryPolicy;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/boxoffice";

/// Shortest hold age the reconciler may reclaim.
const MIN_HOLD_STALE_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// Knobs for the reservation and fulfillment core.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub max_tickets_per_order: i32,
    pub retry: RetryPolicy,
    pub credential_attempts: u32,
    pub hold_stale_after: Duration,
    /// `None` disables the background reconciliation pass.
    pub reconcile_interval: Option<Duration>,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            max_tickets_per_order: 10,
            retry: RetryPolicy::default(),
            credential_attempts: 5,
            hold_stale_after: Duration::from_secs(300),
            reconcile_interval: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_connect_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub cors_allowed_origins: Option<String>,
    pub production: bool,
    pub storage: StorageBackend,
    pub checkout: CheckoutSettings,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = CheckoutSettings::default();
        let reconcile_secs = parse_env("RECONCILE_INTERVAL_SECS", 60u64);

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            database_connect_timeout: Duration::from_secs(parse_env(
                "DATABASE_CONNECT_TIMEOUT",
                30,
            )),
            bind_addr: parse_env("BIND_ADDR", default_bind_addr()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            production: env::var("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
            storage: parse_env("STORAGE_BACKEND", StorageBackend::Postgres),
            checkout: CheckoutSettings {
                max_tickets_per_order: parse_env(
                    "MAX_TICKETS_PER_ORDER",
                    defaults.max_tickets_per_order,
                )
                .max(1),
                retry: RetryPolicy {
                    max_attempts: parse_env("STORE_RETRY_ATTEMPTS", defaults.retry.max_attempts),
                    base_delay: Duration::from_millis(parse_env(
                        "STORE_RETRY_BASE_DELAY_MS",
                        25,
                    )),
                },
                credential_attempts: parse_env(
                    "CREDENTIAL_ISSUE_ATTEMPTS",
                    defaults.credential_attempts,
                ),
                hold_stale_after: hold_timeout(parse_env("HOLD_STALE_AFTER_SECS", 300)),
                reconcile_interval: (reconcile_secs > 0)
                    .then(|| Duration::from_secs(reconcile_secs)),
            },
        }
    }
}

fn hold_timeout(secs: u64) -> Duration {
    if secs < MIN_HOLD_STALE_AFTER_SECS {
        tracing::warn!(
            requested = secs,
            minimum = MIN_HOLD_STALE_AFTER_SECS,
            "Hold timeout below minimum, using minimum"
        );
    }
    Duration::from_secs(secs.max(MIN_HOLD_STALE_AFTER_SECS))
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}

/// Reads and parses `name`, falling back to `default` when unset or malformed.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring malformed setting");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("postgres".parse(), Ok(StorageBackend::Postgres));
        assert_eq!(" Memory ".parse(), Ok(StorageBackend::Memory));
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        std::env::set_var("BOXOFFICE_TEST_MALFORMED", "lots");
        assert_eq!(parse_env("BOXOFFICE_TEST_MALFORMED", 7u32), 7);
        std::env::set_var("BOXOFFICE_TEST_WELLFORMED", "12");
        assert_eq!(parse_env("BOXOFFICE_TEST_WELLFORMED", 7u32), 12);
    }

    #[test]
    fn test_hold_timeout_has_a_floor() {
        assert_eq!(hold_timeout(1), Duration::from_secs(MIN_HOLD_STALE_AFTER_SECS));
        assert_eq!(hold_timeout(900), Duration::from_secs(900));
    }

    #[test]
    fn test_default_bind_addr() {
        assert_eq!(default_bind_addr().to_string(), "0.0.0.0:3001");
    }
}
