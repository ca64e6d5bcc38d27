//! Environment-driven configuration.
//!
//! ```text
//! GALA_USE_PERSISTENT_STORES   true | false (default false)
//! GALA_DATABASE_URL            postgres url (falls back to DATABASE_URL)
//! GALA_DB_MAX_CONNECTIONS      pool size (default 10)
//! GALA_DB_ACQUIRE_TIMEOUT_SECS pool acquire timeout (default 5)
//! GALA_TAX_RATE_BPS            invoice tax rate in basis points (default 1600)
//! GALA_LOG_FORMAT              json | pretty (default json)
//! ```

use thiserror::Error;

use gala_booking::TaxRate;
use gala_observability::{LogConfig, LogFormat};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set when persistent stores are enabled")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub tax_rate: TaxRate,
    pub log_format: LogFormat,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = StoreConfig::default();

        let use_persistent_stores = match lookup("GALA_USE_PERSISTENT_STORES") {
            Some(v) => parse_bool("GALA_USE_PERSISTENT_STORES", &v)?,
            None => false,
        };

        let database_url = lookup("GALA_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|url| !url.trim().is_empty());

        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "GALA_DATABASE_URL",
            });
        }

        let max_connections = parse_or("GALA_DB_MAX_CONNECTIONS", &lookup, defaults.max_connections)?;
        if max_connections == 0 {
            return Err(invalid("GALA_DB_MAX_CONNECTIONS", "0", "must be at least 1"));
        }
        let acquire_timeout_secs = parse_or(
            "GALA_DB_ACQUIRE_TIMEOUT_SECS",
            &lookup,
            defaults.acquire_timeout_secs,
        )?;

        let bps = parse_or("GALA_TAX_RATE_BPS", &lookup, TaxRate::DEFAULT.basis_points())?;
        let tax_rate = TaxRate::from_basis_points(bps)
            .map_err(|e| invalid("GALA_TAX_RATE_BPS", &bps.to_string(), &e.to_string()))?;

        let log_format = parse_or("GALA_LOG_FORMAT", &lookup, LogFormat::default())?;

        Ok(Self {
            store: StoreConfig {
                use_persistent_stores,
                database_url,
                max_connections,
                acquire_timeout_secs,
            },
            tax_rate,
            log_format,
        })
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            ..LogConfig::default()
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_or<T, F>(key: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.tax_rate.basis_points(), 1_600);
        assert_eq!(config.store.max_connections, 10);
    }

    #[test]
    fn database_url_falls_back_to_the_generic_variable() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("GALA_USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/gala"),
        ]))
        .unwrap();
        assert!(config.store.use_persistent_stores);
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://localhost/gala"));
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = CoreConfig::from_lookup(lookup(&[("GALA_USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: "GALA_DATABASE_URL" });
    }

    #[test]
    fn malformed_values_are_reported_with_their_key() {
        let err = CoreConfig::from_lookup(lookup(&[("GALA_TAX_RATE_BPS", "sixteen")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GALA_TAX_RATE_BPS", .. }));

        let err = CoreConfig::from_lookup(lookup(&[("GALA_TAX_RATE_BPS", "20000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GALA_TAX_RATE_BPS", .. }));

        let err = CoreConfig::from_lookup(lookup(&[("GALA_LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GALA_LOG_FORMAT", .. }));
    }

    #[test]
    fn pretty_logs_can_be_selected() {
        let config = CoreConfig::from_lookup(lookup(&[("GALA_LOG_FORMAT", "pretty")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_config().format, LogFormat::Pretty);
    }
}
