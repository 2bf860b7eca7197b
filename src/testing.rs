//! Test doubles for the network and storage seams.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheStorage, GenerationInfo, GenerationState, RequestKey, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::error::{OfflineError, OfflineResult};
use crate::http::{Headers, Request, Response, ResponseSnapshot, Transport};

pub const ORIGIN: &str = "https://admin.example.com/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Config with three mandatory assets on the dashboard origin.
pub fn test_config(version: &str) -> Config {
  Config::from_yaml(&format!(
    r#"
cache_version: {version}
origin: {ORIGIN}
bypass_hosts: [firebase, googleapis]
assets:
  - key: /
    content_type: text/html
  - key: /dashboard.js
    content_type: application/javascript
  - key: /manifest.json
    content_type: application/json
"#
  ))
  .unwrap()
}

#[derive(Debug, Clone)]
enum Reply {
  Respond {
    status: u16,
    content_type: Option<&'static str>,
    body: Bytes,
  },
  NetworkError,
}

#[derive(Debug, Clone)]
pub struct SentRequest {
  pub method: Method,
  pub url: String,
  pub headers: Headers,
  pub body: Option<Bytes>,
}

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeTransport {
  routes: Mutex<HashMap<String, Reply>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
  calls: Mutex<Vec<SentRequest>>,
}

impl FakeTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, url: &str, status: u16, body: &'static str) {
    self.respond_typed(url, status, Some("text/plain"), body);
  }

  pub fn respond_typed(
    &self,
    url: &str,
    status: u16,
    content_type: Option<&'static str>,
    body: &'static str,
  ) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Reply::Respond {
        status,
        content_type,
        body: Bytes::from(body),
      },
    );
  }

  /// Make one URL unreachable.
  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::NetworkError);
  }

  /// Make every URL unreachable.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self) -> Vec<SentRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|c| c.url == url).count()
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn send(&self, request: Request) -> OfflineResult<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(SentRequest {
      method: request.method.clone(),
      url: url.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
    });

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(OfflineError::ConnectivityFailure(format!("offline: {}", url)));
    }

    let reply = self.routes.lock().unwrap().get(&url).cloned();
    match reply {
      Some(Reply::Respond {
        status,
        content_type,
        body,
      }) => {
        let mut headers = Headers::new();
        if let Some(content_type) = content_type {
          headers.insert("content-type", content_type);
        }
        Ok(Response::new(status, headers, body))
      }
      Some(Reply::NetworkError) => Err(OfflineError::ConnectivityFailure(format!(
        "connection refused: {}",
        url
      ))),
      None => Ok(Response::text(404, "Not Found")),
    }
  }
}

/// SQLite cache storage that counts every call and can refuse writes.
pub struct CountingStorage {
  inner: SqliteStorage,
  calls: AtomicUsize,
  fail_writes: AtomicBool,
}

impl CountingStorage {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: SqliteStorage::new(Database::open_in_memory().unwrap()),
      calls: AtomicUsize::new(0),
      fail_writes: AtomicBool::new(false),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn reset_calls(&self) {
    self.calls.store(0, Ordering::SeqCst);
  }

  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn hit(&self) {
    self.calls.fetch_add(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl CacheStorage for CountingStorage {
  async fn open(&self, generation: &str) -> OfflineResult<GenerationState> {
    self.hit();
    self.inner.open(generation).await
  }

  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: ResponseSnapshot,
  ) -> OfflineResult<()> {
    self.hit();
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(OfflineError::StorageFailure("disk full".to_string()));
    }
    self.inner.put(generation, key, snapshot).await
  }

  async fn put_all(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, ResponseSnapshot)>,
  ) -> OfflineResult<()> {
    self.hit();
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(OfflineError::StorageFailure("disk full".to_string()));
    }
    self.inner.put_all(generation, entries).await
  }

  async fn lookup(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> OfflineResult<Option<ResponseSnapshot>> {
    self.hit();
    self.inner.lookup(generation, key).await
  }

  async fn lookup_active(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> OfflineResult<Option<ResponseSnapshot>> {
    self.hit();
    self.inner.lookup_active(generation, key).await
  }

  async fn delete(&self, generation: &str) -> OfflineResult<bool> {
    self.hit();
    self.inner.delete(generation).await
  }

  async fn generation_names(&self) -> OfflineResult<Vec<String>> {
    self.hit();
    self.inner.generation_names().await
  }

  async fn set_state(&self, generation: &str, state: GenerationState) -> OfflineResult<()> {
    self.hit();
    self.inner.set_state(generation, state).await
  }

  async fn active_generation(&self) -> OfflineResult<Option<String>> {
    self.hit();
    self.inner.active_generation().await
  }

  async fn generations(&self) -> OfflineResult<Vec<GenerationInfo>> {
    self.hit();
    self.inner.generations().await
  }
}
