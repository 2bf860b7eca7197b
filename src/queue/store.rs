//! Durable record store for pending actions.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use rusqlite::params;
use std::fmt;
use tracing::warn;
use url::Url;

use crate::db::{parse_timestamp, Database};
use crate::error::{OfflineError, OfflineResult};
use crate::http::{Headers, Request};

/// Store-assigned identifier of a pending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(pub i64);

impl fmt::Display for ActionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A mutating call that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAction {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Bytes>,
}

impl NewAction {
  pub fn from_request(request: &Request) -> Self {
    Self {
      method: request.method.clone(),
      url: request.url.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
    }
  }
}

/// A deferred mutating call awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
  pub id: ActionId,
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Bytes>,
  pub enqueued_at: DateTime<Utc>,
}

impl PendingAction {
  /// Rebuild the original request with identical method, headers and body.
  pub fn to_request(&self) -> Request {
    Request {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      mode: Default::default(),
    }
  }
}

/// Single-table store keyed by auto-assigned identifier.
#[async_trait]
pub trait ActionStore: Send + Sync {
  /// Persist the action and return its new, never reused identifier.
  async fn insert(&self, action: NewAction) -> OfflineResult<ActionId>;

  /// All stored actions in insertion order.
  async fn list_all(&self) -> OfflineResult<Vec<PendingAction>>;

  /// Returns whether an action with `id` existed.
  async fn delete(&self, id: ActionId) -> OfflineResult<bool>;
}

/// SQLite-backed action store.
#[derive(Clone)]
pub struct SqliteActionStore {
  db: Database,
}

impl SqliteActionStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

#[async_trait]
impl ActionStore for SqliteActionStore {
  async fn insert(&self, action: NewAction) -> OfflineResult<ActionId> {
    let headers = serde_json::to_string(&action.headers).map_err(OfflineError::storage)?;

    // Insert and rowid read happen under the same connection lock
    self
      .db
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO pending_actions (method, url, headers, body, enqueued_at)
           VALUES (?, ?, ?, ?, ?)",
          params![
            action.method.as_str(),
            action.url.as_str(),
            headers,
            action.body.as_ref().map(|b| b.to_vec()),
            Utc::now().to_rfc3339(),
          ],
        )?;
        Ok(ActionId(conn.last_insert_rowid()))
      })
      .await
  }

  async fn list_all(&self) -> OfflineResult<Vec<PendingAction>> {
    self
      .db
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, method, url, headers, body, enqueued_at
           FROM pending_actions ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, String>(2)?,
              row.get::<_, String>(3)?,
              row.get::<_, Option<Vec<u8>>>(4)?,
              row.get::<_, String>(5)?,
            ))
          })?
          .collect::<Result<Vec<_>, _>>()?;

        // Undecodable rows are skipped; the rest still replay
        let actions: Vec<PendingAction> = rows
          .into_iter()
          .filter_map(|row| {
            let id = row.0;
            match decode_row(row) {
              Ok(action) => Some(action),
              Err(e) => {
                warn!("Skipping unreadable pending action {}: {}", id, e);
                None
              }
            }
          })
          .collect();
        Ok(actions)
      })
      .await
  }

  async fn delete(&self, id: ActionId) -> OfflineResult<bool> {
    self
      .db
      .with_conn(move |conn| {
        let removed = conn.execute("DELETE FROM pending_actions WHERE id = ?", params![id.0])?;
        Ok(removed > 0)
      })
      .await
  }
}

type ActionRow = (i64, String, String, String, Option<Vec<u8>>, String);

fn decode_row(
  (id, method, url, headers, body, enqueued_at): ActionRow,
) -> OfflineResult<PendingAction> {
  Ok(PendingAction {
    id: ActionId(id),
    method: Method::from_bytes(method.as_bytes()).map_err(OfflineError::storage)?,
    url: Url::parse(&url).map_err(OfflineError::storage)?,
    headers: serde_json::from_str(&headers).map_err(OfflineError::storage)?,
    body: body.map(Bytes::from),
    enqueued_at: parse_timestamp(&enqueued_at)?,
  })
}
