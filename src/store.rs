// 🗄️ Durable Store - key/value persistence for engine collections
//
// Each collection is one JSON document under a fixed key, overwritten
// wholesale at the end of every run. No schema versioning.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub const MATCHES_KEY: &str = "reconciliation_matches";
pub const CONFLICTS_KEY: &str = "reconciliation_conflicts";
pub const DUPLICATES_KEY: &str = "reconciliation_duplicates";

/// Key/value collaborator the engine persists through
pub trait ReconciliationStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open store at {:?}", path.as_ref()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_store(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection lock poisoned"))
    }
}

pub fn setup_store(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

impl ReconciliationStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.lock()?;

        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read key {}", key))?;

        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| format!("Corrupt JSON under key {}", key))
        })
        .transpose()
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, chrono::Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to write key {}", key))?;

        Ok(())
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Non-durable store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconciliationStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}
