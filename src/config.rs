//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default worker poll interval: 1 second.
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default number of jobs returned by listings.
const DEFAULT_RECENT_LIMIT: usize = 50;

/// Queue and worker configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Path of the durable job database.
    pub db_path: PathBuf,
    /// How long an idle worker waits before polling the store again.
    pub poll_interval: Duration,
    /// Default page size for job listings.
    pub recent_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/jobq.db"),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl QueueConfig {
    /// Build configuration from `JOBQ_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("JOBQ_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("JOBQ_POLL_INTERVAL_MS") {
            let millis: u64 = parse_value("JOBQ_POLL_INTERVAL_MS", &raw)?;
            if millis == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "JOBQ_POLL_INTERVAL_MS".to_string(),
                    message: "poll interval must be greater than zero".to_string(),
                });
            }
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup("JOBQ_RECENT_LIMIT") {
            config.recent_limit = parse_value("JOBQ_RECENT_LIMIT", &raw)?;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = QueueConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.recent_limit, 50);
        assert_eq!(config.db_path, PathBuf::from("./data/jobq.db"));
    }

    #[test]
    fn reads_overrides() {
        let config = QueueConfig::from_lookup(lookup_from(&[
            ("JOBQ_DB_PATH", "/tmp/q.db"),
            ("JOBQ_POLL_INTERVAL_MS", "250"),
            ("JOBQ_RECENT_LIMIT", "10"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/q.db"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.recent_limit, 10);
    }

    #[test]
    fn rejects_bad_poll_interval() {
        let err = QueueConfig::from_lookup(lookup_from(&[("JOBQ_POLL_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "JOBQ_POLL_INTERVAL_MS"));

        let err =
            QueueConfig::from_lookup(lookup_from(&[("JOBQ_POLL_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
