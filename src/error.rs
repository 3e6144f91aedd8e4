//! Error kinds surfaced by the synchronization core.

use std::fmt;
use thiserror::Error;

use crate::sync::Collection;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Which way a collection was travelling when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Credential or destination is missing
    #[error("sync is not configured: set both a credential and a destination repository")]
    ConfigIncomplete,

    /// Destination does not reduce to exactly `owner/repo`
    #[error("invalid destination '{0}', expected owner/repo or https://github.com/owner/repo")]
    InvalidDestination(String),

    /// Unexpected HTTP status or a failure to reach the remote store
    #[error("remote store error for {path}{}: {detail}", status_suffix(.status))]
    Transport {
        path: String,
        status: Option<u16>,
        detail: String,
    },

    /// Base64 or JSON encode/decode failure
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Local persistence failure
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    /// A collection failed; earlier collections in the same run stay applied
    #[error("failed to {direction} {collection}: {source}")]
    Collection {
        collection: Collection,
        direction: Direction,
        #[source]
        source: Box<SyncError>,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl SyncError {
    pub(crate) fn transport(path: &str, status: Option<u16>, detail: impl Into<String>) -> Self {
        SyncError::Transport {
            path: path.to_string(),
            status,
            detail: detail.into(),
        }
    }

    pub(crate) fn in_collection(self, collection: Collection, direction: Direction) -> Self {
        SyncError::Collection {
            collection,
            direction,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through collection wrappers
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Collection { source, .. } => source.root(),
            other => other,
        }
    }
}
