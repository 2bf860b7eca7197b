pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{OfflineError, OfflineResult};

/// Shared SQLite connection for the offline store.
///
/// Every statement runs under the connection mutex, which also serializes
/// identifier assignment for the action queue.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("errands-offline").join("offline.db"))
  }

  /// Run `f` against the connection on the blocking pool.
  pub async fn with_conn<T, F>(&self, f: F) -> OfflineResult<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> OfflineResult<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn
        .lock()
        .map_err(|e| OfflineError::StorageFailure(format!("Lock poisoned: {}", e)))?;
      f(&mut guard)
    })
    .await?
  }
}

/// Parse an RFC 3339 timestamp as written by the stores.
pub fn parse_timestamp(s: &str) -> OfflineResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| OfflineError::StorageFailure(format!("Failed to parse timestamp '{}': {}", s, e)))
}
