//! Process configuration read from the environment

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::debounce::DEFAULT_DEBOUNCE;
use crate::dispatch::DEFAULT_SEND_TIMEOUT;
use crate::notification_logger::LoggerSettings;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Watched provider configuration directory
    pub config_dir: PathBuf,
    /// SQLite notification log
    pub db_path: PathBuf,
    /// Enables the daily rolling file log when set
    pub log_dir: Option<PathBuf>,
    pub debounce: Duration,
    pub logger: LoggerSettings,
    pub send_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("./configs"),
            db_path: PathBuf::from("./data/notifications.db"),
            log_dir: None,
            debounce: DEFAULT_DEBOUNCE,
            logger: LoggerSettings::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset and blank values use defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let logger = LoggerSettings {
            queue_capacity: positive(&get, "NOTIRELAY_LOG_QUEUE", defaults.logger.queue_capacity)?,
            batch_size: positive(&get, "NOTIRELAY_LOG_BATCH", defaults.logger.batch_size)?,
            flush_interval: Duration::from_secs(positive(
                &get,
                "NOTIRELAY_LOG_FLUSH_SECS",
                defaults.logger.flush_interval.as_secs(),
            )?),
            shutdown_timeout: Duration::from_secs(positive(
                &get,
                "NOTIRELAY_LOG_SHUTDOWN_SECS",
                defaults.logger.shutdown_timeout.as_secs(),
            )?),
        };

        Ok(Self {
            config_dir: get("CONFIG_DIR").map(PathBuf::from).unwrap_or(defaults.config_dir),
            db_path: get("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            debounce: Duration::from_millis(positive(
                &get,
                "NOTIRELAY_DEBOUNCE_MS",
                defaults.debounce.as_millis() as u64,
            )?),
            logger,
            send_timeout: Duration::from_secs(positive(
                &get,
                "NOTIRELAY_SEND_TIMEOUT_SECS",
                defaults.send_timeout.as_secs(),
            )?),
        })
    }
}

fn positive<T>(get: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = get(name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|e| SettingsError::InvalidValue {
        name,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value <= T::default() {
        return Err(SettingsError::InvalidValue {
            name,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<RelayConfig, SettingsError> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.config_dir, PathBuf::from("./configs"));
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.logger.queue_capacity, 1000);
        assert_eq!(config.logger.batch_size, 100);
        assert_eq!(config.logger.flush_interval, Duration::from_secs(5));
        assert_eq!(config.logger.shutdown_timeout, Duration::from_secs(30));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("CONFIG_DIR", "/etc/notirelay/providers"),
            ("DB_PATH", "/var/lib/notirelay/logs.db"),
            ("LOG_DIR", "/var/log/notirelay"),
            ("NOTIRELAY_DEBOUNCE_MS", "150"),
            ("NOTIRELAY_LOG_BATCH", " 25 "),
            ("NOTIRELAY_SEND_TIMEOUT_SECS", "10"),
        ])
        .unwrap();

        assert_eq!(config.config_dir, PathBuf::from("/etc/notirelay/providers"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/notirelay")));
        assert_eq!(config.debounce, Duration::from_millis(150));
        assert_eq!(config.logger.batch_size, 25);
        assert_eq!(config.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values() {
        let err = from_pairs(&[("NOTIRELAY_LOG_QUEUE", "lots")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid value for NOTIRELAY_LOG_QUEUE"));

        let err = from_pairs(&[("NOTIRELAY_DEBOUNCE_MS", "0")]).unwrap_err();
        assert!(err.to_string().contains("must be greater than zero"));

        // Blank means unset
        assert!(from_pairs(&[("LOG_DIR", "  ")]).unwrap().log_dir.is_none());
    }
}
