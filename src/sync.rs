//! Sync Engine - pushes local collections to the remote store and restores them
//!
//! Collections are always processed in the fixed order tokens, channels,
//! models. A run stops at the first failing collection; collections already
//! written stay written on both sides, there is no cross-collection rollback.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{CollectionPolicy, CollectionsConfig};
use crate::error::{Direction, Result, SyncError};
use crate::remote::RemoteBlobStore;
use crate::state::RecordStore;
use crate::target::SyncTarget;

/// The record collections mirrored to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tokens,
    Channels,
    Models,
}

impl Collection {
    /// Processing order for every push and pull
    pub const ALL: [Collection; 3] = [Collection::Tokens, Collection::Channels, Collection::Models];

    /// Blob name in the remote store
    pub fn blob_path(&self) -> &'static str {
        match self {
            Collection::Tokens => "tokens.json",
            Collection::Channels => "channels.json",
            Collection::Models => "models.json",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Collection::Tokens => "tokens",
            Collection::Channels => "channels",
            Collection::Models => "models",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// An opaque JSON object identified by its integer `id` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record {
    id: i64,
    fields: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let id = match fields.get("id") {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| format!("record id must be an integer, got {}", value))?,
            None => return Err("record has no id field".to_string()),
        };
        Ok(Self { id, fields })
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        record.fields
    }
}

impl Record {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Set a field; the identifier cannot be changed this way
    pub fn set(&mut self, field: &str, value: Value) {
        if field != "id" {
            self.fields.insert(field.to_string(), value);
        }
    }

    fn without_fields(&self, names: &[String]) -> Record {
        let mut stripped = self.clone();
        for name in names.iter().filter(|n| n.as_str() != "id") {
            stripped.fields.remove(name);
        }
        stripped
    }
}

/// Per-collection outcome of a push or pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionOutcome {
    Pushed { records: usize },
    Restored { inserted: usize, replaced: usize },
    /// No blob exists remotely for this collection
    Absent,
}

/// Results from a complete push or pull run
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub direction: Direction,
    pub collections: Vec<(Collection, CollectionOutcome)>,
    pub duration: Duration,
}

impl SyncSummary {
    pub fn record_count(&self) -> usize {
        self.collections
            .iter()
            .map(|(_, outcome)| match outcome {
                CollectionOutcome::Pushed { records } => *records,
                CollectionOutcome::Restored { inserted, replaced } => inserted + replaced,
                CollectionOutcome::Absent => 0,
            })
            .sum()
    }
}

/// Serializes local collections and drives the remote blob store
#[derive(Clone)]
pub struct SyncEngine {
    records: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteBlobStore>,
    policies: Arc<CollectionsConfig>,
}

impl SyncEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteBlobStore>,
        policies: CollectionsConfig,
    ) -> Self {
        Self {
            records,
            remote,
            policies: Arc::new(policies),
        }
    }

    fn policy(&self, collection: Collection) -> &CollectionPolicy {
        self.policies.policy(collection)
    }

    /// Export every collection to the remote store
    pub async fn push_all(&self, target: &SyncTarget) -> Result<SyncSummary> {
        let start = Instant::now();
        let locator = target.locator()?;

        info!("Pushing collections to {}", locator);

        let mut collections = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let outcome = self
                .push_collection(target, collection)
                .await
                .map_err(|e| e.in_collection(collection, Direction::Push))?;
            collections.push((collection, outcome));
        }

        Ok(SyncSummary {
            direction: Direction::Push,
            collections,
            duration: start.elapsed(),
        })
    }

    /// Import every collection present remotely into local storage
    pub async fn pull_all(&self, target: &SyncTarget) -> Result<SyncSummary> {
        let start = Instant::now();
        let locator = target.locator()?;

        info!("Restoring collections from {}", locator);

        let mut collections = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let outcome = self
                .pull_collection(target, collection)
                .await
                .map_err(|e| e.in_collection(collection, Direction::Pull))?;
            collections.push((collection, outcome));
        }

        Ok(SyncSummary {
            direction: Direction::Pull,
            collections,
            duration: start.elapsed(),
        })
    }

    async fn push_collection(
        &self,
        target: &SyncTarget,
        collection: Collection,
    ) -> Result<CollectionOutcome> {
        let policy = self.policy(collection);
        let mut records = self
            .records
            .load_all(collection)
            .map_err(SyncError::Storage)?;

        if policy.redact_sensitive && !policy.sensitive_fields.is_empty() {
            records = records
                .iter()
                .map(|r| r.without_fields(&policy.sensitive_fields))
                .collect();
        }

        let body = serde_json::to_vec_pretty(&records)
            .map_err(|e| SyncError::Encoding(format!("failed to serialize {}: {}", collection, e)))?;

        self.remote.put(target, collection.blob_path(), &body).await?;

        info!("Pushed {} {} records", records.len(), collection);
        Ok(CollectionOutcome::Pushed {
            records: records.len(),
        })
    }

    async fn pull_collection(
        &self,
        target: &SyncTarget,
        collection: Collection,
    ) -> Result<CollectionOutcome> {
        let Some(blob) = self.remote.fetch(target, collection.blob_path()).await? else {
            info!("No remote {} found, leaving local {} untouched", collection.blob_path(), collection);
            return Ok(CollectionOutcome::Absent);
        };

        // Every record is validated here, before any local write
        let incoming: Vec<Record> = serde_json::from_slice(&blob).map_err(|e| {
            SyncError::Encoding(format!("failed to parse {}: {}", collection.blob_path(), e))
        })?;

        let policy = self.policy(collection);
        let mut inserted = 0;
        let mut replaced = 0;

        for remote in incoming {
            let existing = self
                .records
                .find(collection, remote.id())
                .map_err(SyncError::Storage)?;

            match existing {
                Some(local) => {
                    let restored = carry_redacted_fields(remote, &local, policy);
                    self.records
                        .replace(collection, &restored)
                        .map_err(SyncError::Storage)?;
                    replaced += 1;
                }
                None => {
                    self.records
                        .insert(collection, &remote)
                        .map_err(SyncError::Storage)?;
                    inserted += 1;
                }
            }
        }

        info!(
            "Restored {}: {} inserted, {} replaced",
            collection, inserted, replaced
        );
        Ok(CollectionOutcome::Restored { inserted, replaced })
    }
}

/// Full replace with the remote record, except that fields withheld on push
/// keep their local values
fn carry_redacted_fields(mut remote: Record, local: &Record, policy: &CollectionPolicy) -> Record {
    if !policy.redact_sensitive {
        return remote;
    }

    for field in &policy.sensitive_fields {
        if remote.get(field).is_some() {
            continue;
        }
        if let Some(value) = local.get(field) {
            debug!("Keeping local {} of record {}", field, local.id());
            remote.set(field, value.clone());
        }
    }
    remote
}
