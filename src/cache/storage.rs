//! Cache storage trait and SQLite implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::str::FromStr;

use super::key::RequestKey;
use crate::db::{parse_timestamp, Database};
use crate::error::{OfflineError, OfflineResult};
use crate::http::{Headers, ResponseSnapshot};

/// Lifecycle state of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Mandatory assets are being fetched; never served from.
  Installing,
  /// Fully populated, waiting for activation.
  Installed,
  /// The generation requests are served from.
  Active,
  /// Replaced by a newer active generation; pending deletion.
  Superseded,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Active => "active",
      Self::Superseded => "superseded",
    }
  }
}

impl fmt::Display for GenerationState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for GenerationState {
  type Err = OfflineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "active" => Ok(Self::Active),
      "superseded" => Ok(Self::Superseded),
      other => Err(OfflineError::StorageFailure(format!(
        "unknown generation state '{}'",
        other
      ))),
    }
  }
}

/// Summary of one stored generation.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
  pub name: String,
  pub state: GenerationState,
  pub entries: usize,
  pub created_at: DateTime<Utc>,
}

/// Durable key-value store of named cache generations.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the generation in `Installing` state if it does not exist yet.
  /// Returns the generation's current state.
  async fn open(&self, generation: &str) -> OfflineResult<GenerationState>;

  /// Store a snapshot, replacing any previous entry for the same key.
  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: ResponseSnapshot,
  ) -> OfflineResult<()>;

  /// Store a batch of snapshots in one transaction: either every entry is
  /// written or none is.
  async fn put_all(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, ResponseSnapshot)>,
  ) -> OfflineResult<()>;

  /// Look up a snapshot in one generation.
  async fn lookup(&self, generation: &str, key: &RequestKey)
    -> OfflineResult<Option<ResponseSnapshot>>;

  /// Look up a snapshot in `generation` only while it is the active one.
  async fn lookup_active(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> OfflineResult<Option<ResponseSnapshot>>;

  /// Remove a generation and all its entries. Returns whether it existed.
  async fn delete(&self, generation: &str) -> OfflineResult<bool>;

  async fn generation_names(&self) -> OfflineResult<Vec<String>>;

  /// Move a generation to `state`. Marking one `Active` supersedes any
  /// other active generation in the same step.
  async fn set_state(&self, generation: &str, state: GenerationState) -> OfflineResult<()>;

  /// Name of the generation currently served from, if any.
  async fn active_generation(&self) -> OfflineResult<Option<String>>;

  async fn generations(&self) -> OfflineResult<Vec<GenerationInfo>>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  async fn select_entry(
    &self,
    generation: &str,
    key: &RequestKey,
    only_active: bool,
  ) -> OfflineResult<Option<ResponseSnapshot>> {
    let generation = generation.to_string();
    let key_hash = key.digest();

    self
      .db
      .with_conn(move |conn| {
        let row: Option<(u16, String, Vec<u8>)> = conn
          .query_row(
            "SELECT e.status, e.headers, e.body
             FROM cache_entries e JOIN generations g ON g.name = e.generation
             WHERE e.generation = ?1 AND e.key_hash = ?2 AND (?3 = 0 OR g.state = ?4)",
            params![
              generation,
              key_hash,
              only_active,
              GenerationState::Active.as_str()
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;

        match row {
          Some((status, headers, body)) => {
            let headers: Headers = serde_json::from_str(&headers).map_err(OfflineError::storage)?;
            Ok(Some(ResponseSnapshot {
              status,
              headers,
              body: Bytes::from(body),
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }
}

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, generation: &str) -> OfflineResult<GenerationState> {
    let generation = generation.to_string();
    self
      .db
      .with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
          "INSERT OR IGNORE INTO generations (name, state, created_at, updated_at)
           VALUES (?, ?, ?, ?)",
          params![generation, GenerationState::Installing.as_str(), now, now],
        )?;

        let state: String = conn.query_row(
          "SELECT state FROM generations WHERE name = ?",
          params![generation],
          |row| row.get(0),
        )?;
        state.parse()
      })
      .await
  }

  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: ResponseSnapshot,
  ) -> OfflineResult<()> {
    self.put_all(generation, vec![(key.clone(), snapshot)]).await
  }

  async fn put_all(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, ResponseSnapshot)>,
  ) -> OfflineResult<()> {
    let generation = generation.to_string();
    let rows = entries
      .into_iter()
      .map(|(key, snapshot)| -> OfflineResult<(RequestKey, ResponseSnapshot, String)> {
        let headers = serde_json::to_string(&snapshot.headers).map_err(OfflineError::storage)?;
        Ok((key, snapshot, headers))
      })
      .collect::<OfflineResult<Vec<_>>>()?;

    self
      .db
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        let exists: Option<String> = tx
          .query_row(
            "SELECT name FROM generations WHERE name = ?",
            params![generation],
            |row| row.get(0),
          )
          .optional()?;
        if exists.is_none() {
          return Err(OfflineError::StorageFailure(format!(
            "generation '{}' does not exist",
            generation
          )));
        }

        let now = Utc::now().to_rfc3339();
        for (key, snapshot, headers) in rows {
          tx.execute(
            "INSERT OR REPLACE INTO cache_entries
               (generation, key_hash, method, url, status, headers, body, cached_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
              generation,
              key.digest(),
              key.method(),
              key.url(),
              snapshot.status,
              headers,
              snapshot.body.to_vec(),
              now,
            ],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn lookup(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> OfflineResult<Option<ResponseSnapshot>> {
    self.select_entry(generation, key, false).await
  }

  async fn lookup_active(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> OfflineResult<Option<ResponseSnapshot>> {
    self.select_entry(generation, key, true).await
  }

  async fn delete(&self, generation: &str) -> OfflineResult<bool> {
    let generation = generation.to_string();
    self
      .db
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM cache_entries WHERE generation = ?",
          params![generation],
        )?;
        let removed = tx.execute("DELETE FROM generations WHERE name = ?", params![generation])?;
        tx.commit()?;
        Ok(removed > 0)
      })
      .await
  }

  async fn generation_names(&self) -> OfflineResult<Vec<String>> {
    self
      .db
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY created_at, name")?;
        let names = stmt
          .query_map([], |row| row.get(0))?
          .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
      })
      .await
  }

  async fn set_state(&self, generation: &str, state: GenerationState) -> OfflineResult<()> {
    let generation = generation.to_string();
    self
      .db
      .with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        if state == GenerationState::Active {
          tx.execute(
            "UPDATE generations SET state = ?, updated_at = ? WHERE state = ? AND name != ?",
            params![
              GenerationState::Superseded.as_str(),
              now,
              GenerationState::Active.as_str(),
              generation
            ],
          )?;
        }
        let updated = tx.execute(
          "UPDATE generations SET state = ?, updated_at = ? WHERE name = ?",
          params![state.as_str(), now, generation],
        )?;
        if updated == 0 {
          return Err(OfflineError::NotFound(format!("generation '{}'", generation)));
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn active_generation(&self) -> OfflineResult<Option<String>> {
    self
      .db
      .with_conn(|conn| {
        let name = conn
          .query_row(
            "SELECT name FROM generations WHERE state = ? ORDER BY updated_at DESC LIMIT 1",
            params![GenerationState::Active.as_str()],
            |row| row.get(0),
          )
          .optional()?;
        Ok(name)
      })
      .await
  }

  async fn generations(&self) -> OfflineResult<Vec<GenerationInfo>> {
    self
      .db
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT g.name, g.state, g.created_at,
                  (SELECT COUNT(*) FROM cache_entries e WHERE e.generation = g.name)
           FROM generations g
           ORDER BY g.created_at, g.name",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, String>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, String>(2)?,
              row.get::<_, i64>(3)?,
            ))
          })?
          .collect::<Result<Vec<_>, _>>()?;

        rows
          .into_iter()
          .map(|(name, state, created_at, entries)| -> OfflineResult<GenerationInfo> {
            Ok(GenerationInfo {
              name,
              state: state.parse()?,
              entries: entries as usize,
              created_at: parse_timestamp(&created_at)?,
            })
          })
          .collect()
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap())
  }

  fn key(path: &str) -> RequestKey {
    RequestKey::resolve(&Url::parse("https://admin.example.com/").unwrap(), path).unwrap()
  }

  fn snapshot(body: &'static str) -> ResponseSnapshot {
    ResponseSnapshot {
      status: 200,
      headers: Headers::from_iter([("content-type", "text/javascript")]),
      body: Bytes::from(body),
    }
  }

  #[tokio::test]
  async fn test_put_and_lookup() {
    let storage = storage();
    storage.open("v1").await.unwrap();
    storage.put("v1", &key("/app.js"), snapshot("let a = 1;")).await.unwrap();

    let found = storage.lookup("v1", &key("/app.js")).await.unwrap();
    assert_eq!(found, Some(snapshot("let a = 1;")));
    assert_eq!(storage.lookup("v1", &key("/other.js")).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_put_same_key_twice_keeps_one_entry() {
    let storage = storage();
    storage.open("v1").await.unwrap();
    storage.put("v1", &key("/app.js"), snapshot("first")).await.unwrap();
    storage.put("v1", &key("/app.js"), snapshot("second")).await.unwrap();

    let infos = storage.generations().await.unwrap();
    assert_eq!(infos[0].entries, 1);
    let found = storage.lookup("v1", &key("/app.js")).await.unwrap().unwrap();
    assert_eq!(found.body, Bytes::from("second"));
  }

  #[tokio::test]
  async fn test_put_into_unknown_generation_fails() {
    let storage = storage();
    let err = storage.put("ghost", &key("/app.js"), snapshot("x")).await.unwrap_err();
    assert!(matches!(err, OfflineError::StorageFailure(_)));
  }

  #[tokio::test]
  async fn test_open_is_idempotent_and_reports_state() {
    let storage = storage();
    assert_eq!(storage.open("v1").await.unwrap(), GenerationState::Installing);
    storage.set_state("v1", GenerationState::Installed).await.unwrap();
    assert_eq!(storage.open("v1").await.unwrap(), GenerationState::Installed);
    assert_eq!(storage.generation_names().await.unwrap(), vec!["v1".to_string()]);
  }

  #[tokio::test]
  async fn test_activate_supersedes_previous() {
    let storage = storage();
    storage.open("v1").await.unwrap();
    storage.set_state("v1", GenerationState::Active).await.unwrap();
    storage.open("v2").await.unwrap();
    assert_eq!(storage.active_generation().await.unwrap(), Some("v1".to_string()));

    storage.set_state("v2", GenerationState::Active).await.unwrap();
    assert_eq!(storage.active_generation().await.unwrap(), Some("v2".to_string()));

    let states: Vec<_> = storage
      .generations()
      .await
      .unwrap()
      .into_iter()
      .map(|g| (g.name, g.state))
      .collect();
    assert!(states.contains(&("v1".to_string(), GenerationState::Superseded)));
    assert!(states.contains(&("v2".to_string(), GenerationState::Active)));
  }

  #[tokio::test]
  async fn test_delete_removes_entries() {
    let storage = storage();
    storage.open("v1").await.unwrap();
    storage.put("v1", &key("/app.js"), snapshot("x")).await.unwrap();

    assert!(storage.delete("v1").await.unwrap());
    assert!(!storage.delete("v1").await.unwrap());
    assert!(storage.generation_names().await.unwrap().is_empty());

    // Recreating the generation must not resurrect old entries
    storage.open("v1").await.unwrap();
    assert_eq!(storage.lookup("v1", &key("/app.js")).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_lookup_active_misses_until_activation() {
    let storage = storage();
    storage.open("v2").await.unwrap();
    storage.put("v2", &key("/app.js"), snapshot("x")).await.unwrap();
    assert_eq!(storage.lookup_active("v2", &key("/app.js")).await.unwrap(), None);

    storage.set_state("v2", GenerationState::Active).await.unwrap();
    assert_eq!(
      storage.lookup_active("v2", &key("/app.js")).await.unwrap(),
      Some(snapshot("x"))
    );
  }

  #[tokio::test]
  async fn test_put_all_is_all_or_nothing() {
    let storage = storage();
    storage.open("v1").await.unwrap();
    storage.put("v1", &key("/app.js"), snapshot("old app")).await.unwrap();
    storage.put("v1", &key("/app.css"), snapshot("old css")).await.unwrap();

    // Reject writes for one URL to fail the batch halfway through
    storage
      .db
      .with_conn(|conn| {
        conn.execute_batch(
          "CREATE TRIGGER reject_css BEFORE INSERT ON cache_entries
           WHEN NEW.url LIKE '%/app.css'
           BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )?;
        Ok(())
      })
      .await
      .unwrap();

    let batch = vec![
      (key("/app.js"), snapshot("new app")),
      (key("/app.css"), snapshot("new css")),
    ];
    let err = storage.put_all("v1", batch).await.unwrap_err();
    assert!(matches!(err, OfflineError::StorageFailure(_)));

    let app = storage.lookup("v1", &key("/app.js")).await.unwrap().unwrap();
    assert_eq!(app.body, Bytes::from("old app"));
    let css = storage.lookup("v1", &key("/app.css")).await.unwrap().unwrap();
    assert_eq!(css.body, Bytes::from("old css"));
  }

  #[tokio::test]
  async fn test_repeated_and_binary_headers_are_stored_losslessly() {
    let storage = storage();
    storage.open("v1").await.unwrap();
    let mut headers = Headers::from_iter([("set-cookie", "a=1"), ("set-cookie", "b=2")]);
    headers.append("x-legacy", Bytes::from_static(b"caf\xe9"));
    let stored = ResponseSnapshot {
      status: 200,
      headers,
      body: Bytes::from("ok"),
    };

    storage.put("v1", &key("/login"), stored.clone()).await.unwrap();
    assert_eq!(storage.lookup("v1", &key("/login")).await.unwrap(), Some(stored));
  }

  #[tokio::test]
  async fn test_set_state_unknown_generation() {
    let storage = storage();
    let err = storage.set_state("nope", GenerationState::Active).await.unwrap_err();
    assert!(matches!(err, OfflineError::NotFound(_)));
  }
}
