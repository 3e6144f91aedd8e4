//! Administrative surface: status query, manual push, manual restore
//!
//! Handlers never fail outright. Every error is folded into an
//! [`AdminResponse`] with `success: false` and a readable message, which is
//! what a front-end would hand back to the operator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::controller::SyncController;
use crate::error::SyncError;
use crate::settings::SettingKey;
use crate::sync::{CollectionOutcome, SyncSummary};

/// Envelope returned by every admin handler
#[derive(Debug, Clone, Serialize)]
pub struct AdminResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> AdminResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Credential and destination both resolve to non-empty values
    pub enabled: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub collection: String,
    pub status: &'static str,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub direction: String,
    pub collections: Vec<CollectionReport>,
    pub duration_secs: f64,
}

impl From<&SyncSummary> for SyncReport {
    fn from(summary: &SyncSummary) -> Self {
        let collections = summary
            .collections
            .iter()
            .map(|(collection, outcome)| {
                let (status, records, replaced) = match outcome {
                    CollectionOutcome::Pushed { records } => ("pushed", *records, None),
                    CollectionOutcome::Restored { inserted, replaced } => {
                        ("restored", *inserted, Some(*replaced))
                    }
                    CollectionOutcome::Absent => ("absent", 0, None),
                };
                CollectionReport {
                    collection: collection.to_string(),
                    status,
                    records,
                    replaced,
                }
            })
            .collect();

        SyncReport {
            direction: summary.direction.to_string(),
            collections,
            duration_secs: summary.duration.as_secs_f64(),
        }
    }
}

/// Request handlers over the lifecycle controller
#[derive(Clone)]
pub struct AdminApi {
    controller: SyncController,
}

impl AdminApi {
    pub fn new(controller: SyncController) -> Self {
        Self { controller }
    }

    pub async fn status(&self) -> AdminResponse<SyncStatus> {
        let state = self.controller.run_state().await;
        let last_sync_time = state.last_sync_time.or_else(|| self.persisted_last_sync());

        AdminResponse::ok(
            "",
            SyncStatus {
                enabled: self.controller.resolver().resolve().is_some(),
                last_sync_time,
                running: state.running,
            },
        )
    }

    /// Push once; the periodic schedule is left untouched
    pub async fn trigger(&self) -> AdminResponse<SyncReport> {
        info!("Manual sync requested");
        match self.controller.trigger().await {
            Ok(summary) => AdminResponse::ok("Sync completed", SyncReport::from(&summary)),
            Err(e) => {
                error!("Manual sync failed: {}", e);
                AdminResponse::failed(failure_message("Sync failed", &e))
            }
        }
    }

    pub async fn restore(&self) -> AdminResponse<SyncReport> {
        info!("Manual restore requested");
        match self.controller.restore().await {
            Ok(summary) => AdminResponse::ok("Restore completed", SyncReport::from(&summary)),
            Err(e) => {
                error!("Manual restore failed: {}", e);
                AdminResponse::failed(failure_message("Restore failed", &e))
            }
        }
    }

    fn persisted_last_sync(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .controller
            .resolver()
            .settings()
            .get(SettingKey::LastSyncTime)?;

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(time) => Some(time.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring unparsable {} value: {}", SettingKey::LastSyncTime, e);
                None
            }
        }
    }
}

fn failure_message(prefix: &str, error: &SyncError) -> String {
    match error {
        SyncError::ConfigIncomplete => error.to_string(),
        other => format!("{}: {}", prefix, other),
    }
}
