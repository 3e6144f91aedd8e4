//! State Management - SQLite-based persistence for settings and synced records
//!
//! This module provides persistent storage for:
//! - Key/value options (sync credential, destination, interval, last sync time)
//! - The three synced collections (tokens, channels, models), one JSON document per row
//!
//! The database is stored in XDG_DATA_HOME/configsync/state.db unless configured otherwise.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::sync::{Collection, Record};

/// Local record storage as seen by the sync engine
///
/// The engine only ever reads and upserts; nothing here deletes.
pub trait RecordStore: Send + Sync {
    /// All records of a collection in storage order
    fn load_all(&self, collection: Collection) -> Result<Vec<Record>>;

    fn find(&self, collection: Collection, id: i64) -> Result<Option<Record>>;

    fn insert(&self, collection: Collection, record: &Record) -> Result<()>;

    /// Overwrite every field of an existing record
    fn replace(&self, collection: Collection, record: &Record) -> Result<()>;
}

/// State database manager
pub struct StateDb {
    conn: Mutex<Connection>,
}

impl StateDb {
    /// Open or create the state database at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        info!("State database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        let mut schema = String::from(
            r#"
            CREATE TABLE IF NOT EXISTS options (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        );
        for collection in Collection::ALL {
            schema.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, data TEXT NOT NULL);\n",
                collection.table()
            ));
        }

        self.conn()
            .execute_batch(&schema)
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    // =========================================================================
    // Option Operations
    // =========================================================================

    /// Read every persisted option
    pub fn load_options(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM options")?;

        let options = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to query options")?
            .collect::<Result<HashMap<_, _>, _>>()
            .context("Failed to collect options")?;

        Ok(options)
    }

    pub fn get_option(&self, key: &str) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT value FROM options WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read option {}", key))
    }

    pub fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.conn()
            .execute(
                r#"
                INSERT INTO options (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = ?2
                "#,
                params![key, value],
            )
            .with_context(|| format!("Failed to write option {}", key))?;

        debug!("Updated option {}", key);
        Ok(())
    }

    /// Number of records in a collection
    pub fn count(&self, collection: Collection) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", collection.table()),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to count {}", collection))?;
        Ok(count as usize)
    }
}

fn decode_row(collection: Collection, data: &str) -> Result<Record> {
    serde_json::from_str(data)
        .with_context(|| format!("Corrupt {} row in state database", collection))
}

fn encode_row(record: &Record) -> Result<String> {
    serde_json::to_string(record).context("Failed to serialize record")
}

// =========================================================================
// Record Operations
// =========================================================================

impl RecordStore for StateDb {
    fn load_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT data FROM {} ORDER BY id",
            collection.table()
        ))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .with_context(|| format!("Failed to query {}", collection))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to collect {}", collection))?;

        rows.iter().map(|data| decode_row(collection, data)).collect()
    }

    fn find(&self, collection: Collection, id: i64) -> Result<Option<Record>> {
        let data: Option<String> = self
            .conn()
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1", collection.table()),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to look up {} record {}", collection, id))?;

        data.map(|d| decode_row(collection, &d)).transpose()
    }

    fn insert(&self, collection: Collection, record: &Record) -> Result<()> {
        let data = encode_row(record)?;
        self.conn()
            .execute(
                &format!("INSERT INTO {} (id, data) VALUES (?1, ?2)", collection.table()),
                params![record.id(), data],
            )
            .with_context(|| format!("Failed to insert {} record {}", collection, record.id()))?;
        Ok(())
    }

    fn replace(&self, collection: Collection, record: &Record) -> Result<()> {
        let data = encode_row(record)?;
        let updated = self
            .conn()
            .execute(
                &format!("UPDATE {} SET data = ?2 WHERE id = ?1", collection.table()),
                params![record.id(), data],
            )
            .with_context(|| format!("Failed to update {} record {}", collection, record.id()))?;

        if updated == 0 {
            anyhow::bail!("{} record {} does not exist", collection, record.id());
        }
        Ok(())
    }
}
