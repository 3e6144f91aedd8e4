//! Lifecycle controller for the periodic push loop
//!
//! One controller owns at most one background loop. `start` always tears
//! down a running loop before arming a new one, and every transition happens
//! under a single async mutex. The mutex is held for transitions and for
//! stamping the last sync time, never across a push or pull.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::resolver::{ConfigResolver, ConfigSource};
use crate::settings::SettingKey;
use crate::sync::{SyncEngine, SyncSummary};

/// Snapshot of the controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunState {
    pub running: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
}

struct ActiveLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    interval: Duration,
}

#[derive(Default)]
struct RunState {
    active: Option<ActiveLoop>,
    last_sync_time: Option<DateTime<Utc>>,
}

impl RunState {
    fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }
}

struct Inner {
    engine: SyncEngine,
    resolver: ConfigResolver,
    stop_grace: Duration,
    state: Mutex<RunState>,
}

/// Start/stop/restart control over the periodic sync, plus manual runs
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Inner>,
}

impl SyncController {
    pub fn new(engine: SyncEngine, resolver: ConfigResolver, stop_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                resolver,
                stop_grace,
                state: Mutex::new(RunState::default()),
            }),
        }
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.inner.resolver
    }

    /// Arm the periodic loop, replacing any loop already running
    ///
    /// Returns whether a loop is running afterwards; incomplete configuration
    /// leaves the controller stopped.
    pub async fn start(&self) -> bool {
        let mut state = self.inner.state.lock().await;

        if state.active.is_some() {
            info!("Stopping existing sync loop before restart");
            self.inner.stop_locked(&mut state).await;
        }

        let Some(effective) = self.inner.resolver.resolve() else {
            info!("Sync configuration incomplete, periodic sync not started");
            info!("Set a credential and destination through the environment or the persisted settings");
            return false;
        };

        match effective.source {
            ConfigSource::Environment => info!("Using sync configuration from the environment"),
            ConfigSource::Settings => info!("Using sync configuration from persisted settings"),
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.inner.clone(),
            cancel.clone(),
            effective.interval,
        ));

        state.active = Some(ActiveLoop {
            cancel,
            handle,
            interval: effective.interval,
        });

        info!("Periodic sync started, interval {:?}", effective.interval);
        true
    }

    /// Signal the loop to exit before its next tick; no-op when stopped
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if state.active.is_some() {
            info!("Stopping periodic sync");
            self.inner.stop_locked(&mut state).await;
        }
    }

    /// Re-resolve configuration and re-arm the loop
    pub async fn restart(&self) -> bool {
        info!("Restarting periodic sync");
        self.start().await
    }

    /// Restart whenever a schedule-relevant setting changes
    pub fn register_settings_hook(&self) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.resolver.settings().on_change(move |key| {
            if !key.affects_schedule() {
                return;
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let controller = SyncController { inner };
                    runtime.spawn(async move {
                        controller.restart().await;
                    });
                }
                Err(_) => warn!("Setting {} changed outside the runtime, restart skipped", key),
            }
        });
    }

    /// Push once, outside the timer
    pub async fn trigger(&self) -> Result<SyncSummary> {
        let effective = self
            .inner
            .resolver
            .resolve()
            .ok_or(SyncError::ConfigIncomplete)?;

        let summary = self.inner.engine.push_all(&effective.target).await?;
        self.inner.record_success().await;
        Ok(summary)
    }

    /// Pull once; never scheduled
    pub async fn restore(&self) -> Result<SyncSummary> {
        let effective = self
            .inner
            .resolver
            .resolve()
            .ok_or(SyncError::ConfigIncomplete)?;

        let summary = self.inner.engine.pull_all(&effective.target).await?;
        self.inner.record_success().await;
        Ok(summary)
    }

    pub async fn run_state(&self) -> SyncRunState {
        let state = self.inner.state.lock().await;
        SyncRunState {
            running: state.is_running(),
            last_sync_time: state.last_sync_time,
        }
    }

    /// Interval of the running loop, if any
    pub async fn active_interval(&self) -> Option<Duration> {
        let state = self.inner.state.lock().await;
        state
            .active
            .as_ref()
            .filter(|_| state.is_running())
            .map(|active| active.interval)
    }
}

impl Inner {
    async fn stop_locked(&self, state: &mut RunState) {
        let Some(active) = state.active.take() else {
            return;
        };

        active.cancel.cancel();

        // A push in flight is left to finish; the token keeps it from ticking again
        match tokio::time::timeout(self.stop_grace, active.handle).await {
            Ok(Ok(())) => debug!("Sync loop exited"),
            Ok(Err(e)) => error!("Sync loop ended abnormally: {}", e),
            Err(_) => warn!(
                "Sync loop still finishing a push after {:?}; it will exit before its next tick",
                self.stop_grace
            ),
        }

        info!("Periodic sync stopped");
    }

    async fn record_success(&self) {
        let now = Utc::now();
        self.state.lock().await.last_sync_time = Some(now);

        // persisted outside the state lock
        if let Err(e) = self
            .resolver
            .settings()
            .set(SettingKey::LastSyncTime, &now.to_rfc3339())
        {
            warn!("Failed to persist last sync time: {:#}", e);
        }
    }

    /// One scheduled tick: re-resolve, push, stamp
    async fn tick(&self) {
        let Some(effective) = self.resolver.resolve() else {
            info!("Sync configuration incomplete, skipping this tick");
            return;
        };

        debug!("Starting scheduled sync");
        match self.engine.push_all(&effective.target).await {
            Ok(summary) => {
                self.record_success().await;
                info!(
                    "Scheduled sync completed in {:.2}s: {} records across {} collections",
                    summary.duration.as_secs_f64(),
                    summary.record_count(),
                    summary.collections.len()
                );
            }
            Err(e) => error!("Scheduled sync failed: {}", e),
        }
    }
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken, period: Duration) {
    // First tick one full period after start
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Sync loop running with interval {:?}", period);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = timer.tick() => inner.tick().await,
        }
    }

    debug!("Sync loop exiting");
}
