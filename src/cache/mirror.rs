//! Persistence mirror: durable and session-scoped storage for cache entries.
//!
//! The mirror holds a 1:1 copy of allow-listed entries under the identical
//! key. The durable scope is a SQLite database that outlives the process
//! and is the only channel by which state is shared across concurrently
//! running instances; sharing is read-once-at-rehydration, never live. The
//! session scope is the same implementation over an in-memory connection.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;

use super::entry::CacheEntry;

/// Storage backend for one mirror scope.
pub trait MirrorStore: Send + Sync {
  /// Write or replace the mirrored copy of an entry.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Remove the mirrored copy of a key. Removing an absent key is not an
  /// error.
  fn remove(&self, key: &str) -> Result<()>;

  /// Remove several keys at once.
  fn remove_many(&self, keys: &[String]) -> Result<()>;

  /// All mirrored entries. Rows that fail to parse are deleted from the
  /// store and skipped.
  fn load_all(&self) -> Result<Vec<CacheEntry>>;

  /// All mirrored keys.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop every mirrored entry.
  fn clear(&self) -> Result<()>;
}

/// Mirror that persists nothing. Used when persistence is disabled.
pub struct NoopMirror;

impl MirrorStore for NoopMirror {
  fn put(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(())
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn remove_many(&self, _keys: &[String]) -> Result<()> {
    Ok(())
  }

  fn load_all(&self) -> Result<Vec<CacheEntry>> {
    Ok(Vec::new())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-backed mirror store.
pub struct SqliteMirror {
  conn: Mutex<Connection>,
}

/// Schema for the mirror table.
const MIRROR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_mirror (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    stale_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;

impl SqliteMirror {
  /// Open the durable mirror at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create mirror directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open mirror database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory mirror. Backs the session scope, and tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory mirror: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let mirror = Self {
      conn: Mutex::new(conn),
    };
    mirror.run_migrations()?;
    Ok(mirror)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("linport").join("mirror.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(MIRROR_SCHEMA)
      .map_err(|e| eyre!("Failed to run mirror migrations: {}", e))?;

    Ok(())
  }
}

impl MirrorStore for SqliteMirror {
  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(&entry.data).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_mirror (key, data, created_at, stale_at, expires_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          entry.key,
          data,
          entry.created_at.to_rfc3339(),
          entry.stale_at.to_rfc3339(),
          entry.expires_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to mirror entry: {}", e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM response_mirror WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove mirrored entry: {}", e))?;

    Ok(())
  }

  fn remove_many(&self, keys: &[String]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for key in keys {
      conn
        .execute("DELETE FROM response_mirror WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to remove mirrored entry: {}", e))?;
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn load_all(&self) -> Result<Vec<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key, data, created_at, stale_at, expires_at FROM response_mirror")
      .map_err(|e| eyre!("Failed to prepare mirror query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String, String, String)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query mirror: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    drop(stmt);

    let mut entries = Vec::with_capacity(rows.len());
    let mut corrupt: Vec<String> = Vec::new();

    for (key, data, created_at, stale_at, expires_at) in rows {
      match parse_row(&key, &data, &created_at, &stale_at, &expires_at) {
        Some(entry) => entries.push(entry),
        None => corrupt.push(key),
      }
    }

    // A row that no longer parses stays corrupt forever; delete it rather
    // than re-reporting it on every startup.
    for key in &corrupt {
      tracing::warn!(key = %key, "dropping corrupt mirrored entry");
      conn
        .execute("DELETE FROM response_mirror WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to delete corrupt entry: {}", e))?;
    }

    Ok(entries)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM response_mirror")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query mirror keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM response_mirror", [])
      .map_err(|e| eyre!("Failed to clear mirror: {}", e))?;

    Ok(())
  }
}

fn parse_row(
  key: &str,
  data: &[u8],
  created_at: &str,
  stale_at: &str,
  expires_at: &str,
) -> Option<CacheEntry> {
  Some(CacheEntry {
    key: key.to_string(),
    data: serde_json::from_slice(data).ok()?,
    created_at: parse_datetime(created_at)?,
    stale_at: parse_datetime(stale_at)?,
    expires_at: parse_datetime(expires_at)?,
  })
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
}
