//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::onboarding::HostContext;

/// Onboarding engine configuration.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Host the wizard runs inside. Constrained hosts skip the plan step.
    pub host_context: HostContext,
    /// Deadline for the final profile commit.
    pub commit_timeout: Duration,
    /// Attempts per scheduled background save (at least 1).
    pub sync_max_attempts: u32,
    /// Delay between background save attempts, multiplied by the attempt number.
    pub sync_retry_backoff: Duration,
    /// libSQL file used by the binary.
    pub db_path: PathBuf,
    /// Port for the status routes, if they should be served.
    pub status_port: Option<u16>,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            host_context: HostContext::Standard,
            commit_timeout: Duration::from_secs(15),
            sync_max_attempts: 3,
            sync_retry_backoff: Duration::from_millis(500),
            db_path: PathBuf::from("./data/onboarding.db"),
            status_port: None,
        }
    }
}

impl OnboardingConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host_context = match lookup("ONBOARDING_HOST_CONTEXT") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "ONBOARDING_HOST_CONTEXT".to_string(),
                message,
            })?,
            None => defaults.host_context,
        };

        let commit_timeout = parse_var::<u64>(&lookup, "ONBOARDING_COMMIT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.commit_timeout);

        let sync_max_attempts = parse_var::<u32>(&lookup, "ONBOARDING_SYNC_MAX_ATTEMPTS")?
            .unwrap_or(defaults.sync_max_attempts);
        if sync_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARDING_SYNC_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let sync_retry_backoff = parse_var::<u64>(&lookup, "ONBOARDING_SYNC_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_retry_backoff);

        let db_path = lookup("ONBOARDING_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let status_port = parse_var::<u16>(&lookup, "ONBOARDING_STATUS_PORT")?;

        Ok(Self {
            host_context,
            commit_timeout,
            sync_max_attempts,
            sync_retry_backoff,
            db_path,
            status_port,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        None => Ok(None),
    }
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
    fn defaults_when_nothing_set() {
        let config = OnboardingConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.host_context, HostContext::Standard);
        assert_eq!(config.commit_timeout, Duration::from_secs(15));
        assert_eq!(config.sync_max_attempts, 3);
        assert!(config.status_port.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = OnboardingConfig::from_lookup(lookup_from(&[
            ("ONBOARDING_HOST_CONTEXT", "constrained"),
            ("ONBOARDING_COMMIT_TIMEOUT_SECS", "30"),
            ("ONBOARDING_SYNC_MAX_ATTEMPTS", "5"),
            ("ONBOARDING_SYNC_BACKOFF_MS", "10"),
            ("ONBOARDING_DB_PATH", "/tmp/x.db"),
            ("ONBOARDING_STATUS_PORT", "8088"),
        ]))
        .unwrap();
        assert_eq!(config.host_context, HostContext::Constrained);
        assert_eq!(config.commit_timeout, Duration::from_secs(30));
        assert_eq!(config.sync_max_attempts, 5);
        assert_eq!(config.sync_retry_backoff, Duration::from_millis(10));
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.status_port, Some(8088));
    }

    #[test]
    fn rejects_bad_values() {
        let err = OnboardingConfig::from_lookup(lookup_from(&[(
            "ONBOARDING_COMMIT_TIMEOUT_SECS",
            "soon",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "ONBOARDING_COMMIT_TIMEOUT_SECS"
        ));

        let err =
            OnboardingConfig::from_lookup(lookup_from(&[("ONBOARDING_HOST_CONTEXT", "kiosk")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err =
            OnboardingConfig::from_lookup(lookup_from(&[("ONBOARDING_SYNC_MAX_ATTEMPTS", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
