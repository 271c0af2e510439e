//! Engine configuration (builder-style, with environment overrides).

use std::time::Duration;

use thiserror::Error;

pub const WORKER_NAME_ENV: &str = "MATERIALFLOW_WORKER_NAME";
pub const POLL_INTERVAL_ENV: &str = "MATERIALFLOW_POLL_INTERVAL_MS";
pub const COALESCE_JOBS_ENV: &str = "MATERIALFLOW_COALESCE_JOBS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base name for threads and log fields.
    pub name: String,
    /// How long background loops block before re-checking for shutdown.
    pub poll_interval: Duration,
    /// When several passes are queued, run only the newest.
    pub coalesce_jobs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "material-usage".to_string(),
            poll_interval: Duration::from_millis(250),
            coalesce_jobs: true,
        }
    }
}

impl EngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_coalesce_jobs(mut self, coalesce: bool) -> Self {
        self.coalesce_jobs = coalesce;
        self
    }

    /// Defaults overridden by `MATERIALFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = lookup(WORKER_NAME_ENV) {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: WORKER_NAME_ENV,
                    value: name,
                    reason: "must not be blank",
                });
            }
            config.name = name.trim().to_string();
        }

        if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
            let ms = match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: POLL_INTERVAL_ENV,
                        value: raw,
                        reason: "expected a positive number of milliseconds",
                    });
                }
            };
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup(COALESCE_JOBS_ENV) {
            config.coalesce_jobs = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: COALESCE_JOBS_ENV,
                        value: raw,
                        reason: "expected a boolean",
                    });
                }
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(EngineConfig::from_lookup(|_| None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn overrides_from_environment() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (WORKER_NAME_ENV, "usage-a"),
            (POLL_INTERVAL_ENV, "40"),
            (COALESCE_JOBS_ENV, "off"),
        ]))
        .unwrap();

        assert_eq!(config.name, "usage-a");
        assert_eq!(config.poll_interval, Duration::from_millis(40));
        assert!(!config.coalesce_jobs);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = EngineConfig::from_lookup(lookup_from(&[(POLL_INTERVAL_ENV, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: POLL_INTERVAL_ENV, .. }));

        let err = EngineConfig::from_lookup(lookup_from(&[(COALESCE_JOBS_ENV, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: COALESCE_JOBS_ENV, .. }));
    }
}
