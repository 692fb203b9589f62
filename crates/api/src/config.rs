//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use idempotency::IdempotencyConfig;
use thiserror::Error;

/// A configuration value that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid config {name}: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub reason: &'static str,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8080`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `REDIS_URL`: Redis URL; unset runs on the in-memory coordination store
/// - `IDEMPOTENCY_TTL_SECONDS`: retention of finalized records (default: `86400`)
/// - `IDEMPOTENCY_PROVISIONAL_TTL_SECONDS`: lifetime of a claim (default: `60`)
/// - `IDEMPOTENCY_CLAIM_TIMEOUT_MS`: coordination round-trip deadline (default: `2000`)
/// - `IDEMPOTENCY_MAX_CLOCK_SKEW_SECONDS`: accepted `Ax-Request-At` skew (default: `600`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub idempotency_ttl_secs: u64,
    pub idempotency_provisional_ttl_secs: u64,
    pub idempotency_claim_timeout_ms: u64,
    pub idempotency_max_clock_skew_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Unparseable numbers fall back to their default as well.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: env_non_empty("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            redis_url: env_non_empty("REDIS_URL"),
            idempotency_ttl_secs: env_parse(
                "IDEMPOTENCY_TTL_SECONDS",
                defaults.idempotency_ttl_secs,
            ),
            idempotency_provisional_ttl_secs: env_parse(
                "IDEMPOTENCY_PROVISIONAL_TTL_SECONDS",
                defaults.idempotency_provisional_ttl_secs,
            ),
            idempotency_claim_timeout_ms: env_parse(
                "IDEMPOTENCY_CLAIM_TIMEOUT_MS",
                defaults.idempotency_claim_timeout_ms,
            ),
            idempotency_max_clock_skew_secs: env_parse(
                "IDEMPOTENCY_MAX_CLOCK_SKEW_SECONDS",
                defaults.idempotency_max_clock_skew_secs,
            ),
        }
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |name| ConfigError {
            name,
            reason: "must be greater than 0",
        };
        if self.port == 0 {
            return Err(zero("PORT"));
        }
        if self.database_max_connections == 0 {
            return Err(zero("DATABASE_MAX_CONNECTIONS"));
        }
        if self.idempotency_ttl_secs == 0 {
            return Err(zero("IDEMPOTENCY_TTL_SECONDS"));
        }
        if self.idempotency_provisional_ttl_secs == 0 {
            return Err(zero("IDEMPOTENCY_PROVISIONAL_TTL_SECONDS"));
        }
        if self.idempotency_claim_timeout_ms == 0 {
            return Err(zero("IDEMPOTENCY_CLAIM_TIMEOUT_MS"));
        }
        if self.idempotency_max_clock_skew_secs == 0 {
            return Err(zero("IDEMPOTENCY_MAX_CLOCK_SKEW_SECONDS"));
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the coordinator timing settings.
    pub fn idempotency(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            ttl: Duration::from_secs(self.idempotency_ttl_secs),
            provisional_ttl: Duration::from_secs(self.idempotency_provisional_ttl_secs),
            claim_timeout: Duration::from_millis(self.idempotency_claim_timeout_ms),
            max_clock_skew: Duration::from_secs(self.idempotency_max_clock_skew_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            idempotency_ttl_secs: 86_400,
            idempotency_provisional_ttl_secs: 60,
            idempotency_claim_timeout_ms: 2_000,
            idempotency_max_clock_skew_secs: 600,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 9090,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:9090");
    }

    #[test]
    fn test_idempotency_settings() {
        let config = Config {
            idempotency_ttl_secs: 300,
            idempotency_claim_timeout_ms: 250,
            ..Config::default()
        };
        let idempotency = config.idempotency();
        assert_eq!(idempotency.ttl, Duration::from_secs(300));
        assert_eq!(idempotency.provisional_ttl, Duration::from_secs(60));
        assert_eq!(idempotency.claim_timeout, Duration::from_millis(250));
        assert_eq!(idempotency.max_clock_skew, Duration::from_secs(600));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let config = Config {
            port: 0,
            ..Config::default()
        };
        assert_eq!(config.validate().unwrap_err().name, "PORT");

        let config = Config {
            idempotency_provisional_ttl_secs: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate().unwrap_err().name,
            "IDEMPOTENCY_PROVISIONAL_TTL_SECONDS"
        );

        let config = Config {
            idempotency_claim_timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
