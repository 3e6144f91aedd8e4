//! Sync target parsing
//!
//! A destination is accepted either as a bare `owner/repo` or as a full
//! repository URL such as `https://github.com/owner/repo/`. After the scheme
//! and host are stripped and surrounding slashes trimmed, exactly two
//! non-empty path segments must remain.

use std::fmt;

use crate::error::{Result, SyncError};

/// Credential plus destination locator, exactly as configured
#[derive(Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub credential: String,
    pub destination: String,
}

// Keep the credential out of logs and panic messages
impl fmt::Debug for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTarget")
            .field("credential", &"<redacted>")
            .field("destination", &self.destination)
            .finish()
    }
}

/// Owner and repository name extracted from a destination string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl SyncTarget {
    pub fn new(credential: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            destination: destination.into(),
        }
    }

    /// Parse the destination; nothing touches the network before this succeeds
    pub fn locator(&self) -> Result<RepoLocator> {
        RepoLocator::parse(&self.destination)
    }
}

impl RepoLocator {
    pub fn parse(destination: &str) -> Result<Self> {
        let trimmed = destination.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"));

        // A URL carries a host segment in front of owner/repo
        let path = match without_scheme {
            Some(rest) => match rest.split_once('/') {
                Some((_host, path)) => path,
                None => "",
            },
            None => trimmed,
        };

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(SyncError::InvalidDestination(destination.to_string())),
        }
    }
}
