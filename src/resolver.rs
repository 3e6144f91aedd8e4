//! Effective configuration resolution
//!
//! Credential and destination come as a pair: the environment override wins
//! only when both variables are non-empty, otherwise both are taken from the
//! persisted settings. The interval is resolved on its own and never fails.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::settings::Settings;
use crate::target::SyncTarget;

/// Resolved {credential, destination, interval}; rebuilt on every use
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub target: SyncTarget,
    pub interval: Duration,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Environment,
    Settings,
}

/// Where environment overrides are read from
#[derive(Debug, Clone)]
enum EnvOverride {
    Process {
        credential_var: String,
        destination_var: String,
    },
    Fixed {
        credential: Option<String>,
        destination: Option<String>,
    },
}

#[derive(Clone)]
pub struct ConfigResolver {
    settings: Arc<Settings>,
    env: EnvOverride,
    default_interval: Duration,
}

impl ConfigResolver {
    /// Resolver reading overrides from the process environment
    pub fn new(settings: Arc<Settings>, config: &Config) -> Self {
        Self {
            settings,
            env: EnvOverride::Process {
                credential_var: config.sync.env_credential_var.clone(),
                destination_var: config.sync.env_destination_var.clone(),
            },
            default_interval: config.default_interval(),
        }
    }

    /// Resolver with fixed override values instead of process variables
    pub fn with_overrides(
        settings: Arc<Settings>,
        credential: Option<String>,
        destination: Option<String>,
        default_interval: Duration,
    ) -> Self {
        Self {
            settings,
            env: EnvOverride::Fixed {
                credential,
                destination,
            },
            default_interval,
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Effective configuration, or `None` when credential or destination is missing
    pub fn resolve(&self) -> Option<EffectiveConfig> {
        let snapshot = self.settings.snapshot();
        let interval = parse_interval(&snapshot.interval).unwrap_or(self.default_interval);

        let (env_credential, env_destination) = self.env_pair();
        let (credential, destination, source) = match (env_credential, env_destination) {
            (Some(credential), Some(destination)) => {
                (credential, destination, ConfigSource::Environment)
            }
            _ => (snapshot.credential, snapshot.destination, ConfigSource::Settings),
        };

        if credential.trim().is_empty() || destination.trim().is_empty() {
            debug!("Sync configuration incomplete");
            return None;
        }

        Some(EffectiveConfig {
            target: SyncTarget::new(credential, destination),
            interval,
            source,
        })
    }

    /// Both halves of the environment pair, each only if non-empty
    fn env_pair(&self) -> (Option<String>, Option<String>) {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        match &self.env {
            EnvOverride::Process {
                credential_var,
                destination_var,
            } => (
                non_empty(std::env::var(credential_var).ok()),
                non_empty(std::env::var(destination_var).ok()),
            ),
            EnvOverride::Fixed {
                credential,
                destination,
            } => (non_empty(credential.clone()), non_empty(destination.clone())),
        }
    }
}

/// Parse an interval given in seconds, integral or fractional
pub fn parse_interval(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs > 0.0 {
        // sub-nanosecond values round down to zero, which no timer accepts
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|interval| !interval.is_zero())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingKey;
    use crate::state::StateDb;
    use serial_test::serial;

    const DEFAULT: Duration = Duration::from_secs(3600);

    fn settings_with(pairs: &[(SettingKey, &str)]) -> Arc<Settings> {
        let settings = Settings::load(Arc::new(StateDb::open_in_memory().unwrap())).unwrap();
        for (key, value) in pairs {
            settings.set(*key, value).unwrap();
        }
        Arc::new(settings)
    }

    fn resolver(settings: Arc<Settings>, env: (Option<&str>, Option<&str>)) -> ConfigResolver {
        ConfigResolver::with_overrides(
            settings,
            env.0.map(String::from),
            env.1.map(String::from),
            DEFAULT,
        )
    }

    #[test]
    fn test_environment_pair_wins() {
        let settings = settings_with(&[
            (SettingKey::Credential, "db-token"),
            (SettingKey::Destination, "db/repo"),
        ]);

        let effective = resolver(settings, (Some("env-token"), Some("env/repo")))
            .resolve()
            .unwrap();

        assert_eq!(effective.source, ConfigSource::Environment);
        assert_eq!(effective.target.credential, "env-token");
        assert_eq!(effective.target.destination, "env/repo");
    }

    #[test]
    fn test_partial_environment_falls_back_to_settings_pair() {
        let settings = settings_with(&[
            (SettingKey::Credential, "db-token"),
            (SettingKey::Destination, "db/repo"),
        ]);

        let effective = resolver(settings, (Some("env-token"), None)).resolve().unwrap();

        assert_eq!(effective.source, ConfigSource::Settings);
        assert_eq!(effective.target.credential, "db-token");
        assert_eq!(effective.target.destination, "db/repo");
    }

    #[test]
    fn test_incomplete_settings_resolve_to_none() {
        let only_credential = settings_with(&[(SettingKey::Credential, "db-token")]);
        assert!(resolver(only_credential, (None, None)).resolve().is_none());

        let only_destination = settings_with(&[(SettingKey::Destination, "db/repo")]);
        assert!(resolver(only_destination, (None, Some("env/repo"))).resolve().is_none());

        let blank = settings_with(&[
            (SettingKey::Credential, "   "),
            (SettingKey::Destination, "db/repo"),
        ]);
        assert!(resolver(blank, (Some(""), Some(""))).resolve().is_none());
    }

    #[test]
    fn test_interval_resolution() {
        let base = [
            (SettingKey::Credential, "t"),
            (SettingKey::Destination, "a/b"),
        ];

        let effective = resolver(settings_with(&base), (None, None)).resolve().unwrap();
        assert_eq!(effective.interval, DEFAULT);

        let mut custom = base.to_vec();
        custom.push((SettingKey::Interval, "120"));
        let effective = resolver(settings_with(&custom), (None, None)).resolve().unwrap();
        assert_eq!(effective.interval, Duration::from_secs(120));

        let mut invalid = base.to_vec();
        invalid.push((SettingKey::Interval, "soon"));
        let effective = resolver(settings_with(&invalid), (None, None)).resolve().unwrap();
        assert_eq!(effective.interval, DEFAULT);

        let mut vanishing = base.to_vec();
        vanishing.push((SettingKey::Interval, "0.0000000001"));
        let effective = resolver(settings_with(&vanishing), (None, None)).resolve().unwrap();
        assert_eq!(effective.interval, DEFAULT);
    }

    #[test]
    fn test_interval_applies_to_environment_config_too() {
        let settings = settings_with(&[(SettingKey::Interval, "45")]);
        let effective = resolver(settings, (Some("t"), Some("a/b"))).resolve().unwrap();
        assert_eq!(effective.interval, Duration::from_secs(45));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("300"), Some(Duration::from_secs(300)));
        assert_eq!(parse_interval(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_interval("0"), None);
        assert_eq!(parse_interval("0.0000000001"), None);
        assert_eq!(parse_interval("-10"), None);
        assert_eq!(parse_interval("inf"), None);
        assert_eq!(parse_interval("NaN"), None);
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("5m"), None);
    }

    #[test]
    #[serial]
    fn test_process_environment_overrides() {
        std::env::set_var("TEST_CONFIGSYNC_TOKEN", "env-token");
        std::env::set_var("TEST_CONFIGSYNC_REPO", "https://github.com/env/repo");

        let mut config = Config::default();
        config.sync.env_credential_var = "TEST_CONFIGSYNC_TOKEN".into();
        config.sync.env_destination_var = "TEST_CONFIGSYNC_REPO".into();

        let effective = ConfigResolver::new(settings_with(&[]), &config).resolve().unwrap();
        assert_eq!(effective.source, ConfigSource::Environment);
        assert_eq!(effective.target.destination, "https://github.com/env/repo");

        std::env::remove_var("TEST_CONFIGSYNC_TOKEN");
        let resolver = ConfigResolver::new(settings_with(&[]), &config);
        assert!(resolver.resolve().is_none());

        std::env::remove_var("TEST_CONFIGSYNC_REPO");
    }
}
