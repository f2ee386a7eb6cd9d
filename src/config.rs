//! Environment configuration.

use std::env;

use location_provider::Requestor;

use crate::error::ConfigError;
use crate::session::UpdateTiming;

/// Requestor name registered when none is configured.
pub const DEFAULT_REQUESTOR: &str = "positioner";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionerConfig {
    pub requestor_name: String,
    pub timing: UpdateTiming,
    pub log_filter: Option<String>,
}

impl PositionerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = UpdateTiming::ONE_SHOT;
        let update_timeout_us = env_micros_opt("POSITIONER_UPDATE_TIMEOUT_US")?
            .unwrap_or(defaults.update_timeout_us());
        let max_update_age_us = env_micros_opt("POSITIONER_MAX_UPDATE_AGE_US")?
            .unwrap_or(defaults.max_update_age_us());

        Ok(Self {
            requestor_name: env_string_opt("POSITIONER_REQUESTOR")
                .unwrap_or_else(|| DEFAULT_REQUESTOR.to_string()),
            timing: UpdateTiming::from_micros(update_timeout_us, max_update_age_us),
            log_filter: env_string_opt("POSITIONER_LOG"),
        })
    }

    #[must_use]
    pub fn requestor(&self) -> Requestor {
        Requestor::service(self.requestor_name.clone())
    }
}

impl Default for PositionerConfig {
    fn default() -> Self {
        Self {
            requestor_name: DEFAULT_REQUESTOR.to_string(),
            timing: UpdateTiming::ONE_SHOT,
            log_filter: None,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_micros_opt(key: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(value) = env_string_opt(key) else {
        return Ok(None);
    };

    match value.trim().parse::<u64>() {
        Ok(micros) => Ok(Some(micros)),
        Err(_) => Err(ConfigError::InvalidValue { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::{PositionerConfig, DEFAULT_REQUESTOR};
    use crate::error::ConfigError;
    use crate::session::UpdateTiming;
    use std::env;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    const KEYS: [&str; 4] = [
        "POSITIONER_REQUESTOR",
        "POSITIONER_UPDATE_TIMEOUT_US",
        "POSITIONER_MAX_UPDATE_AGE_US",
        "POSITIONER_LOG",
    ];

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        KEYS.into_iter().map(|key| set_env_guard(key, None)).collect()
    }

    #[test]
    fn defaults_match_one_shot_query() {
        let _lock = env_lock();
        let _guards = clear_all();

        let config = PositionerConfig::from_env().expect("defaults parse");

        assert_eq!(config, PositionerConfig::default());
        assert_eq!(config.requestor().name, DEFAULT_REQUESTOR);
        assert_eq!(config.timing, UpdateTiming::ONE_SHOT);
    }

    #[test]
    fn values_are_read_from_env() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("POSITIONER_REQUESTOR", Some("pytwink"));
        let _g2 = set_env_guard("POSITIONER_UPDATE_TIMEOUT_US", Some("5000000"));
        let _g3 = set_env_guard("POSITIONER_MAX_UPDATE_AGE_US", Some(" 0 "));
        let _g4 = set_env_guard("POSITIONER_LOG", Some("positioner=trace"));

        let config = PositionerConfig::from_env().expect("values parse");

        assert_eq!(config.requestor_name, "pytwink");
        assert_eq!(config.timing.update_timeout, Duration::from_secs(5));
        assert_eq!(config.timing.max_update_age, Duration::ZERO);
        assert_eq!(config.log_filter.as_deref(), Some("positioner=trace"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("POSITIONER_REQUESTOR", Some("  "));
        let _g2 = set_env_guard("POSITIONER_UPDATE_TIMEOUT_US", Some(""));

        let config = PositionerConfig::from_env().expect("blank values ignored");

        assert_eq!(config.requestor_name, DEFAULT_REQUESTOR);
        assert_eq!(config.timing, UpdateTiming::ONE_SHOT);
    }

    #[test]
    fn non_numeric_duration_is_rejected() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("POSITIONER_MAX_UPDATE_AGE_US", Some("30s"));

        assert_eq!(
            PositionerConfig::from_env(),
            Err(ConfigError::InvalidValue {
                key: "POSITIONER_MAX_UPDATE_AGE_US",
                value: "30s".to_string(),
            })
        );
    }
}
