//! Common test utilities: a stateful fake of the GitHub contents API

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use configsync::config::CollectionsConfig;
use configsync::{
    Collection, ConfigResolver, GitHubContentsStore, Record, RecordStore, SettingKey, Settings,
    StateDb, SyncController, SyncEngine, SyncTarget,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const CONTENTS_PATH: &str = r"^/repos/[^/]+/[^/]+/contents/.+$";

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub sha: String,
    pub content: Vec<u8>,
}

/// A PUT as received by the fake store
#[derive(Debug, Clone)]
pub struct ReceivedPut {
    pub path: String,
    pub message: String,
    pub sha: Option<String>,
}

#[derive(Default)]
struct StoreState {
    blobs: HashMap<String, StoredBlob>,
    puts: Vec<ReceivedPut>,
    revision: u64,
}

/// In-memory repository behind a wiremock server
///
/// GET serves stored blobs base64-wrapped at 60 columns, PUT enforces the
/// revision check the real API does: updates must name the current sha.
#[derive(Clone, Default)]
pub struct FakeContentsApi {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Deserialize)]
struct PutBody {
    message: String,
    content: String,
    sha: Option<String>,
}

impl FakeContentsApi {
    pub async fn mount(server: &MockServer) -> Self {
        let api = Self::default();

        Mock::given(method("GET"))
            .and(path_regex(CONTENTS_PATH))
            .respond_with(GetContents(api.clone()))
            .mount(server)
            .await;

        Mock::given(method("PUT"))
            .and(path_regex(CONTENTS_PATH))
            .respond_with(PutContents(api.clone()))
            .mount(server)
            .await;

        api
    }

    fn key(repo: &str, file: &str) -> String {
        format!("/repos/{}/contents/{}", repo, file)
    }

    /// Seed a blob as if someone had committed it earlier
    pub fn seed(&self, repo: &str, file: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.revision += 1;
        let sha = format!("seed{}", state.revision);
        state.blobs.insert(
            Self::key(repo, file),
            StoredBlob {
                sha,
                content: content.to_vec(),
            },
        );
    }

    pub fn seed_json(&self, repo: &str, file: &str, value: Value) {
        self.seed(repo, file, value.to_string().as_bytes());
    }

    pub fn blob(&self, repo: &str, file: &str) -> Option<StoredBlob> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(&Self::key(repo, file))
            .cloned()
    }

    pub fn blob_json(&self, repo: &str, file: &str) -> Option<Value> {
        self.blob(repo, file)
            .map(|b| serde_json::from_slice(&b.content).unwrap())
    }

    pub fn puts(&self) -> Vec<ReceivedPut> {
        self.state.lock().unwrap().puts.clone()
    }
}

struct GetContents(FakeContentsApi);

impl Respond for GetContents {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let state = self.0.state.lock().unwrap();
        match state.blobs.get(request.url.path()) {
            Some(blob) => ResponseTemplate::new(200).set_body_json(json!({
                "type": "file",
                "encoding": "base64",
                "sha": blob.sha,
                "content": wrap_base64(&blob.content),
            })),
            None => ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})),
        }
    }
}

struct PutContents(FakeContentsApi);

impl Respond for PutContents {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: PutBody = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let content = match STANDARD.decode(&body.content) {
            Ok(content) => content,
            Err(_) => return ResponseTemplate::new(422),
        };

        let key = request.url.path().to_string();
        let mut state = self.0.state.lock().unwrap();
        state.puts.push(ReceivedPut {
            path: key.clone(),
            message: body.message,
            sha: body.sha.clone(),
        });

        let existing = state.blobs.get(&key).map(|b| b.sha.clone());
        if existing != body.sha {
            return ResponseTemplate::new(409).set_body_json(json!({
                "message": format!("{} does not match", body.sha.unwrap_or_default())
            }));
        }

        state.revision += 1;
        let sha = format!("rev{}", state.revision);
        state.blobs.insert(
            key,
            StoredBlob {
                sha: sha.clone(),
                content,
            },
        );

        let status = if existing.is_some() { 200 } else { 201 };
        ResponseTemplate::new(status).set_body_json(json!({"content": {"sha": sha}}))
    }
}

/// Base64 wrapped at 60 columns, as the contents API serves it
pub fn wrap_base64(content: &[u8]) -> String {
    STANDARD
        .encode(content)
        .as_bytes()
        .chunks(60)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn record(value: Value) -> Record {
    serde_json::from_value(value).expect("test record must be an object with an integer id")
}

pub fn insert(db: &StateDb, collection: Collection, value: Value) {
    db.insert(collection, &record(value)).unwrap();
}

pub fn store(server: &MockServer) -> Arc<GitHubContentsStore> {
    Arc::new(GitHubContentsStore::new(&server.uri(), Duration::from_secs(5), "configsync-test").unwrap())
}

pub fn engine(db: &Arc<StateDb>, server: &MockServer) -> SyncEngine {
    engine_with(db, server, CollectionsConfig::default())
}

pub fn engine_with(db: &Arc<StateDb>, server: &MockServer, policies: CollectionsConfig) -> SyncEngine {
    SyncEngine::new(db.clone(), store(server), policies)
}

pub fn target(destination: &str) -> SyncTarget {
    SyncTarget::new("ghp_integration", destination)
}

/// Controller wired to a real HTTP store, configured through persisted settings
pub fn sync_controller(
    db: &Arc<StateDb>,
    server: &MockServer,
    destination: &str,
) -> (SyncController, Arc<Settings>) {
    let settings = Arc::new(Settings::load(db.clone()).unwrap());
    settings.set(SettingKey::Credential, "ghp_integration").unwrap();
    settings.set(SettingKey::Destination, destination).unwrap();

    let resolver =
        ConfigResolver::with_overrides(settings.clone(), None, None, Duration::from_secs(3600));
    let controller = SyncController::new(engine(db, server), resolver, Duration::from_millis(100));

    (controller, settings)
}
