//! SQLite settings store for MeshCDB persistence

use crate::settings::{relative_name, SettingsBackend};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for settings persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better crash behaviour
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened settings database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Named binary records
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Set a key-value pair
    pub fn kv_set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;

        Ok(())
    }

    /// Get a value by key
    pub fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();

        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Delete a key, returning whether it existed
    pub fn kv_delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    /// List all records whose key lies under `prefix/`, ordered by key
    pub fn kv_list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock();
        let dir = format!("{}/", prefix);

        let mut stmt = conn.prepare(
            "SELECT key, value FROM settings
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;

        let rows = stmt.query_map(params![dir], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    /// Number of stored records
    pub fn kv_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SettingsBackend for Database {
    fn save_one(&self, path: &str, value: &[u8]) -> Result<()> {
        self.kv_set(path, value)?;
        debug!("Saved {} ({} bytes)", path, value.len());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        if self.kv_delete(path)? {
            debug!("Deleted {}", path);
        }
        Ok(())
    }

    fn load(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        // Collect before visiting so the connection lock is released.
        for (key, value) in self.kv_list(prefix)? {
            if let Some(name) = relative_name(prefix, &key) {
                visitor(name, &value)?;
            }
        }
        Ok(())
    }
}
