//! Remote blob store client
//!
//! The store is a revisioned key→blob API shaped like the GitHub contents
//! endpoint: `GET /repos/{owner}/{repo}/contents/{path}` returns base64
//! content plus a `sha` revision, and `PUT` on the same URL creates the blob
//! (no `sha`) or updates it (current `sha`).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::target::{RepoLocator, SyncTarget};

/// Create-or-update / fetch contract over named blobs
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    /// Blob content, or `None` when the store has no blob at `path`
    async fn fetch(&self, target: &SyncTarget, path: &str) -> Result<Option<Vec<u8>>>;

    /// Create or overwrite the blob at `path`
    async fn put(&self, target: &SyncTarget, path: &str, content: &[u8]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

/// HTTP client for a GitHub-compatible contents API
#[derive(Clone)]
pub struct GitHubContentsStore {
    client: Client,
    api_base_url: String,
}

impl GitHubContentsStore {
    pub fn new(api_base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::transport(api_base_url, None, e.to_string()))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.remote.api_base_url,
            config.request_timeout(),
            &config.remote.user_agent,
        )
    }

    fn contents_url(&self, locator: &RepoLocator, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base_url, locator.owner, locator.repo, path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str, credential: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(credential)
            .header(header::ACCEPT, "application/vnd.github.v3+json")
    }

    /// GET the contents document; `None` on 404
    async fn get_contents(
        &self,
        target: &SyncTarget,
        locator: &RepoLocator,
        path: &str,
    ) -> Result<Option<ContentsResponse>> {
        let url = self.contents_url(locator, path);
        debug!("Fetching {} from {}", path, locator);

        let response = self
            .request(reqwest::Method::GET, &url, &target.credential)
            .send()
            .await
            .map_err(|e| SyncError::transport(path, None, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .json::<ContentsResponse>()
                    .await
                    .map_err(|e| SyncError::Encoding(format!("invalid contents response for {}: {}", path, e)))?;
                Ok(Some(body))
            }
            status => Err(SyncError::transport(
                path,
                Some(status.as_u16()),
                format!("file {} is missing or inaccessible", path),
            )),
        }
    }

    /// Current revision of a blob, with every failure treated as "no revision"
    async fn current_revision(
        &self,
        target: &SyncTarget,
        locator: &RepoLocator,
        path: &str,
    ) -> Option<String> {
        match self.get_contents(target, locator, path).await {
            Ok(Some(contents)) => contents.sha,
            Ok(None) => None,
            Err(e) => {
                debug!("Revision probe for {} failed, creating instead: {}", path, e);
                None
            }
        }
    }
}

#[async_trait]
impl RemoteBlobStore for GitHubContentsStore {
    async fn fetch(&self, target: &SyncTarget, path: &str) -> Result<Option<Vec<u8>>> {
        let locator = target.locator()?;

        let Some(contents) = self.get_contents(target, &locator, path).await? else {
            return Ok(None);
        };

        let encoded = contents
            .content
            .ok_or_else(|| SyncError::Encoding(format!("{} response carries no content", path)))?;

        decode_content(&encoded)
            .map(Some)
            .map_err(|e| SyncError::Encoding(format!("base64 decode of {} failed: {}", path, e)))
    }

    async fn put(&self, target: &SyncTarget, path: &str, content: &[u8]) -> Result<()> {
        let locator = target.locator()?;
        let url = self.contents_url(&locator, path);

        let revision = self.current_revision(target, &locator, path).await;

        let body = PutRequest {
            message: format!(
                "Update {} - {}",
                path,
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
            ),
            content: STANDARD.encode(content),
            sha: revision.as_deref(),
        };

        debug!(
            "Writing {} ({} bytes) to {}, revision {:?}",
            path,
            content.len(),
            locator,
            revision
        );

        let response = self
            .request(reqwest::Method::PUT, &url, &target.credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::transport(path, None, e.to_string()))?;

        if matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Ok(());
        }

        Err(rejected(path, response).await)
    }
}

/// Turn a failed write into a transport error carrying the store's error body
async fn rejected(path: &str, response: Response) -> SyncError {
    let status = response.status().as_u16();
    let detail = match response.text().await {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => json.to_string(),
            Err(_) if text.is_empty() => "empty response body".to_string(),
            Err(_) => text,
        },
        Err(e) => {
            warn!("Could not read error body for {}: {}", path, e);
            "unreadable response body".to_string()
        }
    };

    SyncError::transport(path, Some(status), detail)
}

/// Decode line-wrapped base64 as served by the contents API
pub fn decode_content(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let joined: String = encoded.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    STANDARD.decode(joined)
}
