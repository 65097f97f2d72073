// ABOUTME: Configuration loading and validation for the codeclaim server.
// ABOUTME: Reads CODECLAIM_* environment variables and refuses non-loopback binds unless explicitly allowed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use codeclaim_store::DEFAULT_LOCK_TIMEOUT;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CODECLAIM_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("CODECLAIM_LOCK_TIMEOUT_MS must be a positive integer, got {0:?}")]
    InvalidLockTimeout(String),

    #[error("CODECLAIM_BIND {0} is not a loopback address; set CODECLAIM_ALLOW_REMOTE=true to expose the API")]
    RemoteNotAllowed(SocketAddr),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CodeclaimConfig {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub allow_remote: bool,
    pub lock_timeout: Duration,
}

impl CodeclaimConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - CODECLAIM_DB: snapshot file path (default: ./discounts.db)
    /// - CODECLAIM_BIND: socket address to bind (default: 127.0.0.1:8000)
    /// - CODECLAIM_ALLOW_REMOTE: allow non-loopback binds (default: false)
    /// - CODECLAIM_LOCK_TIMEOUT_MS: writer lock wait in milliseconds (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("CODECLAIM_DB")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./discounts.db"));

        let bind_str = lookup("CODECLAIM_BIND").unwrap_or_else(|| "127.0.0.1:8000".to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        let allow_remote = lookup("CODECLAIM_ALLOW_REMOTE")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(false);

        let lock_timeout = match lookup("CODECLAIM_LOCK_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => return Err(ConfigError::InvalidLockTimeout(raw)),
            },
            None => DEFAULT_LOCK_TIMEOUT,
        };

        if !bind.ip().is_loopback() && !allow_remote {
            return Err(ConfigError::RemoteNotAllowed(bind));
        }

        Ok(Self {
            db_path,
            bind,
            allow_remote,
            lock_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<CodeclaimConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CodeclaimConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn config_loads_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.db_path, PathBuf::from("./discounts.db"));
        assert_eq!(config.bind, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert!(!config.allow_remote);
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn config_reads_overrides() {
        let config = load(&[
            ("CODECLAIM_DB", "/var/lib/codeclaim/discounts.db"),
            ("CODECLAIM_BIND", "0.0.0.0:9000"),
            ("CODECLAIM_ALLOW_REMOTE", "yes"),
            ("CODECLAIM_LOCK_TIMEOUT_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/codeclaim/discounts.db"));
        assert_eq!(config.bind.port(), 9000);
        assert!(config.allow_remote);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn config_rejects_remote_without_opt_in() {
        let err = load(&[("CODECLAIM_BIND", "0.0.0.0:8000")]).unwrap_err();
        assert!(
            err.to_string().contains("CODECLAIM_ALLOW_REMOTE"),
            "error should mention the opt-in: {}",
            err
        );
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(matches!(
            load(&[("CODECLAIM_BIND", "not an address")]),
            Err(ConfigError::InvalidBind(_))
        ));
        for raw in ["0", "-5", "soon"] {
            assert!(matches!(
                load(&[("CODECLAIM_LOCK_TIMEOUT_MS", raw)]),
                Err(ConfigError::InvalidLockTimeout(_))
            ));
        }
    }
}
