//! configsync - Configuration Record Mirroring Service
//!
//! configsync periodically exports an application's tokens, channels and
//! models to JSON blobs in a GitHub repository, and restores them on demand.
//!
//! ## Core Features
//!
//! - **Periodic Push**: A single restartable background loop with a configurable interval
//! - **Manual Restore**: Pull remote snapshots back, replacing or inserting records by id
//! - **Two-Tier Configuration**: Environment override pair or persisted settings
//! - **Live Reconfiguration**: Settings changes restart the loop with the new values
//!
//! ## Modules
//!
//! - [`config`]: Application configuration file
//! - [`settings`] / [`resolver`]: Persisted sync settings and their resolution
//! - [`remote`]: GitHub contents API client
//! - [`sync`]: Push and restore of record collections
//! - [`controller`]: Lifecycle of the periodic loop
//! - [`admin`]: Status, trigger and restore handlers

pub mod admin;
pub mod config;
pub mod controller;
pub mod error;
pub mod remote;
pub mod resolver;
pub mod settings;
pub mod state;
pub mod sync;
pub mod target;

pub use admin::{AdminApi, AdminResponse, SyncStatus};
pub use config::Config;
pub use controller::{SyncController, SyncRunState};
pub use error::{Result, SyncError};
pub use remote::{GitHubContentsStore, RemoteBlobStore};
pub use resolver::{ConfigResolver, EffectiveConfig};
pub use settings::{SettingKey, Settings};
pub use state::{RecordStore, StateDb};
pub use sync::{Collection, Record, SyncEngine, SyncSummary};
pub use target::SyncTarget;
