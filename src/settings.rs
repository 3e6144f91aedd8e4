//! Persisted sync settings
//!
//! Settings are cached in memory behind a reader/writer lock and written
//! through to the `options` table. Every successful write notifies the
//! registered change hooks with the key that changed, which is how the
//! lifecycle controller learns that it has to restart. Edits made through
//! another connection reach the cache via [`Settings::reload`], which
//! [`refresh_loop`] calls periodically.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::StateDb;

/// Keys of the persisted settings used by the sync service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Credential,
    Destination,
    Interval,
    LastSyncTime,
}

impl SettingKey {
    pub const ALL: [SettingKey; 4] = [
        SettingKey::Credential,
        SettingKey::Destination,
        SettingKey::Interval,
        SettingKey::LastSyncTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Credential => "sync_token",
            SettingKey::Destination => "sync_repo",
            SettingKey::Interval => "sync_interval",
            SettingKey::LastSyncTime => "sync_last_time",
        }
    }

    /// Whether a change to this key alters the effective sync configuration
    pub fn affects_schedule(&self) -> bool {
        !matches!(self, SettingKey::LastSyncTime)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "credential" | "token" | "sync_token" => Ok(SettingKey::Credential),
            "destination" | "repo" | "sync_repo" => Ok(SettingKey::Destination),
            "interval" | "sync_interval" => Ok(SettingKey::Interval),
            "last_sync_time" | "sync_last_time" => Ok(SettingKey::LastSyncTime),
            other => bail!(
                "Unknown setting '{}', expected credential, destination or interval",
                other
            ),
        }
    }
}

/// Consistent view of the credential/destination pair
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub credential: String,
    pub destination: String,
    pub interval: String,
}

impl fmt::Debug for SettingsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsSnapshot")
            .field("credential_set", &!self.credential.is_empty())
            .field("destination", &self.destination)
            .field("interval", &self.interval)
            .finish()
    }
}

pub type ChangeHook = Box<dyn Fn(SettingKey) + Send + Sync>;

pub struct Settings {
    db: Arc<StateDb>,
    values: RwLock<HashMap<String, String>>,
    hooks: RwLock<Vec<ChangeHook>>,
}

impl Settings {
    /// Load every persisted option into memory
    pub fn load(db: Arc<StateDb>) -> Result<Self> {
        let values = db.load_options()?;
        debug!("Loaded {} persisted settings", values.len());

        Ok(Self {
            db,
            values: RwLock::new(values),
            hooks: RwLock::new(Vec::new()),
        })
    }

    pub fn get(&self, key: SettingKey) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.as_str())
            .cloned()
    }

    /// Read credential, destination and interval under a single read lock
    pub fn snapshot(&self) -> SettingsSnapshot {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let value = |key: SettingKey| values.get(key.as_str()).cloned().unwrap_or_default();

        SettingsSnapshot {
            credential: value(SettingKey::Credential),
            destination: value(SettingKey::Destination),
            interval: value(SettingKey::Interval),
        }
    }

    /// Persist a value, update the cache and notify hooks
    pub fn set(&self, key: SettingKey, value: &str) -> Result<()> {
        {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            self.db.set_option(key.as_str(), value)?;
            values.insert(key.as_str().to_string(), value.to_string());
        }

        debug!("Setting {} updated", key);
        self.notify(key);
        Ok(())
    }

    /// Re-read every option from the database and notify hooks for keys
    /// whose value differs from the cache
    ///
    /// Picks up edits written through another connection, e.g. by a second
    /// process sharing the database file.
    pub fn reload(&self) -> Result<Vec<SettingKey>> {
        let fresh = self.db.load_options()?;

        let changed: Vec<SettingKey> = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            let changed = SettingKey::ALL
                .into_iter()
                .filter(|key| values.get(key.as_str()) != fresh.get(key.as_str()))
                .collect();
            *values = fresh;
            changed
        };

        for key in &changed {
            info!("Setting {} changed in the database", key);
            self.notify(*key);
        }
        Ok(changed)
    }

    /// Register a callback invoked after every successful `set`
    pub fn on_change<F>(&self, hook: F)
    where
        F: Fn(SettingKey) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    fn notify(&self, key: SettingKey) {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook(key);
        }
    }
}

/// Reload settings every `period` until cancelled; `period` must be non-zero
pub async fn refresh_loop(settings: Arc<Settings>, period: Duration, cancel: CancellationToken) {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Settings refresh running every {:?}", period);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = timer.tick() => {
                if let Err(e) = settings.reload() {
                    warn!("Failed to reload settings: {:#}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> Settings {
        Settings::load(Arc::new(StateDb::open_in_memory().unwrap())).unwrap()
    }

    #[test]
    fn test_set_writes_through() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        let settings = Settings::load(db.clone()).unwrap();

        settings.set(SettingKey::Destination, "acme/backups").unwrap();

        assert_eq!(settings.get(SettingKey::Destination).as_deref(), Some("acme/backups"));
        assert_eq!(db.get_option("sync_repo").unwrap().as_deref(), Some("acme/backups"));
    }

    #[test]
    fn test_load_picks_up_persisted_values() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        db.set_option("sync_token", "ghp_x").unwrap();
        db.set_option("sync_interval", "90").unwrap();

        let snapshot = Settings::load(db).unwrap().snapshot();
        assert_eq!(snapshot.credential, "ghp_x");
        assert_eq!(snapshot.destination, "");
        assert_eq!(snapshot.interval, "90");
    }

    #[test]
    fn test_hooks_receive_changed_key() {
        let settings = settings();
        let schedule_changes = Arc::new(AtomicUsize::new(0));
        let counter = schedule_changes.clone();

        settings.on_change(move |key| {
            if key.affects_schedule() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        settings.set(SettingKey::Credential, "ghp_x").unwrap();
        settings.set(SettingKey::Interval, "60").unwrap();
        settings.set(SettingKey::LastSyncTime, "2026-01-01T00:00:00Z").unwrap();

        assert_eq!(schedule_changes.load(Ordering::SeqCst), 2);
    }

    fn shared_file_pair() -> (tempfile::TempDir, Settings, Settings) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        let service = Settings::load(Arc::new(StateDb::open_at(&path).unwrap())).unwrap();
        let editor = Settings::load(Arc::new(StateDb::open_at(&path).unwrap())).unwrap();
        (dir, service, editor)
    }

    #[test]
    fn test_reload_sees_edits_from_another_connection() {
        let (_dir, service, editor) = shared_file_pair();
        service.set(SettingKey::Destination, "old/repo").unwrap();

        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        service.on_change(move |key| sink.write().unwrap().push(key));

        editor.set(SettingKey::Destination, "new/repo").unwrap();
        editor.set(SettingKey::Interval, "30").unwrap();
        assert_eq!(service.snapshot().destination, "old/repo");

        let changed = service.reload().unwrap();
        assert_eq!(changed, vec![SettingKey::Destination, SettingKey::Interval]);
        assert_eq!(*seen.read().unwrap(), changed);

        let snapshot = service.snapshot();
        assert_eq!(snapshot.destination, "new/repo");
        assert_eq!(snapshot.interval, "30");
    }

    #[test]
    fn test_reload_without_changes_is_silent() {
        let (_dir, service, editor) = shared_file_pair();
        editor.set(SettingKey::Credential, "ghp_x").unwrap();
        service.reload().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        service.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // same value written again
        editor.set(SettingKey::Credential, "ghp_x").unwrap();
        assert!(service.reload().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_picks_up_edits() {
        let (_dir, service, editor) = shared_file_pair();
        let service = Arc::new(service);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(
            service.clone(),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        editor.set(SettingKey::Destination, "acme/backups").unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(service.get(SettingKey::Destination).as_deref(), Some("acme/backups"));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_setting_key_parsing() {
        assert_eq!("credential".parse::<SettingKey>().unwrap(), SettingKey::Credential);
        assert_eq!("repo".parse::<SettingKey>().unwrap(), SettingKey::Destination);
        assert_eq!("sync_interval".parse::<SettingKey>().unwrap(), SettingKey::Interval);
        assert!("colour".parse::<SettingKey>().is_err());
    }

    #[test]
    fn test_snapshot_debug_hides_credential() {
        let settings = settings();
        settings.set(SettingKey::Credential, "ghp_secret").unwrap();
        assert!(!format!("{:?}", settings.snapshot()).contains("ghp_secret"));
    }
}
