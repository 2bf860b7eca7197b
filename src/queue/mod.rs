//! Durable queue of mutating requests that failed while offline.
//!
//! Replay is at-least-once: an action is removed only after its replayed call
//! returns 2xx, so an interrupted replay resends whatever was not removed.

mod store;

pub use store::{ActionId, ActionStore, NewAction, PendingAction, SqliteActionStore};

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::OfflineResult;
use crate::http::Transport;

/// Outcome of one replay cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Replayed with 2xx and removed from the store
  pub replayed: Vec<ActionId>,
  /// Still pending, retried on the next trigger
  pub failed: Vec<ActionId>,
  /// Another replay was already running
  pub skipped: bool,
}

pub struct ActionQueue {
  store: Arc<dyn ActionStore>,
  transport: Arc<dyn Transport>,
  replaying: Mutex<()>,
}

impl ActionQueue {
  pub fn new(store: Arc<dyn ActionStore>, transport: Arc<dyn Transport>) -> Self {
    Self {
      store,
      transport,
      replaying: Mutex::new(()),
    }
  }

  /// Persist an action that failed for lack of connectivity.
  ///
  /// Callers must not enqueue calls the server answered with an error status.
  pub async fn enqueue(&self, action: NewAction) -> OfflineResult<ActionId> {
    let method = action.method.clone();
    let url = action.url.clone();
    let id = self.store.insert(action).await?;
    info!("Queued pending action {}: {} {}", id, method, url);
    Ok(id)
  }

  /// Pending actions in insertion order.
  pub async fn list_pending(&self) -> OfflineResult<Vec<PendingAction>> {
    self.store.list_all().await
  }

  /// Remove an action. Removing an unknown id is a no-op returning `false`.
  pub async fn remove(&self, id: ActionId) -> OfflineResult<bool> {
    let removed = self.store.delete(id).await?;
    if removed {
      debug!("Removed pending action {}", id);
    }
    Ok(removed)
  }

  /// Replay every pending action in FIFO order.
  ///
  /// A failing action stays queued and does not stop the batch. Errors are
  /// logged, never returned. A trigger that arrives while a replay is running
  /// is skipped.
  pub async fn replay_all(&self) -> ReplayReport {
    let Ok(_guard) = self.replaying.try_lock() else {
      debug!("Replay already in progress, skipping trigger");
      return ReplayReport {
        skipped: true,
        ..Default::default()
      };
    };

    let mut report = ReplayReport::default();
    let pending = match self.store.list_all().await {
      Ok(pending) => pending,
      Err(e) => {
        warn!("Background sync error: {}", e);
        return report;
      }
    };

    for action in pending {
      match self.transport.send(action.to_request()).await {
        Ok(response) if response.is_success() => match self.store.delete(action.id).await {
          Ok(_) => {
            info!("Replayed pending action {}", action.id);
            report.replayed.push(action.id);
          }
          Err(e) => {
            warn!("Replayed action {} but could not remove it: {}", action.id, e);
            report.failed.push(action.id);
          }
        },
        Ok(response) => {
          warn!(
            "Sync failed for action {}: upstream returned {}",
            action.id,
            response.status()
          );
          report.failed.push(action.id);
        }
        Err(e) => {
          warn!("Sync failed for action {}: {}", action.id, e);
          report.failed.push(action.id);
        }
      }
    }

    if !report.replayed.is_empty() || !report.failed.is_empty() {
      info!(
        "Replay finished: {} replayed, {} still pending",
        report.replayed.len(),
        report.failed.len()
      );
    }
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::testing::{url, FakeTransport};
  use bytes::Bytes;
  use reqwest::Method;
  use std::time::Duration;

  fn queue(transport: &Arc<FakeTransport>) -> ActionQueue {
    let store = SqliteActionStore::new(Database::open_in_memory().unwrap());
    ActionQueue::new(Arc::new(store), transport.clone())
  }

  fn post(path: &'static str, body: &'static str) -> NewAction {
    NewAction {
      method: Method::POST,
      url: url(path),
      headers: [("content-type", "application/json"), ("x-request-id", path)]
        .into_iter()
        .collect(),
      body: Some(Bytes::from(body)),
    }
  }

  #[tokio::test]
  async fn test_replay_removes_only_successful_actions() {
    let transport = FakeTransport::new();
    let queue = queue(&transport);

    let first = queue.enqueue(post("/api/one", "1")).await.unwrap();
    let second = queue.enqueue(post("/api/two", "2")).await.unwrap();
    let third = queue.enqueue(post("/api/three", "3")).await.unwrap();

    transport.respond(url("/api/one").as_str(), 201, "created");
    transport.respond(url("/api/two").as_str(), 200, "ok");
    transport.fail(url("/api/three").as_str());

    let report = queue.replay_all().await;
    assert_eq!(report.replayed, vec![first, second]);
    assert_eq!(report.failed, vec![third]);

    let pending = queue.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, third);
    assert_eq!(pending[0].url, url("/api/three"));
  }

  #[tokio::test]
  async fn test_replay_is_fifo_with_identical_payload() {
    let transport = FakeTransport::new();
    let queue = queue(&transport);
    for path in ["/api/a", "/api/b", "/api/c"] {
      transport.respond(url(path).as_str(), 204, "");
      queue.enqueue(post(path, "payload")).await.unwrap();
    }

    queue.replay_all().await;

    let calls = transport.calls();
    let urls: Vec<_> = calls.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
      urls,
      vec![
        url("/api/a").as_str(),
        url("/api/b").as_str(),
        url("/api/c").as_str()
      ]
    );
    assert_eq!(calls[1].method, Method::POST);
    assert_eq!(calls[1].headers.get("x-request-id"), Some("/api/b"));
    assert_eq!(calls[1].body, Some(Bytes::from("payload")));
    assert!(queue.list_pending().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_upstream_error_keeps_action_and_id() {
    let transport = FakeTransport::new();
    let queue = queue(&transport);
    let id = queue.enqueue(post("/api/one", "1")).await.unwrap();
    transport.respond(url("/api/one").as_str(), 500, "server error");

    let report = queue.replay_all().await;
    assert_eq!(report.failed, vec![id]);

    // Next cycle succeeds with the same id
    transport.respond(url("/api/one").as_str(), 200, "ok");
    let report = queue.replay_all().await;
    assert_eq!(report.replayed, vec![id]);
    assert!(queue.list_pending().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_remove_absent_is_noop() {
    let transport = FakeTransport::new();
    let queue = queue(&transport);
    let id = queue.enqueue(post("/api/one", "1")).await.unwrap();

    assert!(queue.remove(id).await.unwrap());
    assert!(!queue.remove(id).await.unwrap());
  }

  #[tokio::test]
  async fn test_concurrent_replay_triggers_coalesce() {
    let transport = FakeTransport::new();
    transport.set_delay(Duration::from_millis(50));
    transport.respond(url("/api/one").as_str(), 200, "ok");
    let queue = Arc::new(queue(&transport));
    queue.enqueue(post("/api/one", "1")).await.unwrap();

    let (a, b) = tokio::join!(queue.replay_all(), queue.replay_all());
    assert!(a.skipped ^ b.skipped);
    assert_eq!(transport.calls_to(url("/api/one").as_str()), 1);
  }

  #[tokio::test]
  async fn test_replay_of_empty_queue() {
    let transport = FakeTransport::new();
    let report = queue(&transport).replay_all().await;
    assert_eq!(report, ReplayReport::default());
    assert!(transport.calls().is_empty());
  }
}
