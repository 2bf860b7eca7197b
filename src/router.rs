//! Request classification and caching strategies.
//!
//! Every intercepted request resolves to a response: live, cached, the
//! offline document, or a synthetic error. Cache writes and refreshes run as
//! background work registered on the event's [`Lifetime`].

use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, PrecacheManifest, RequestKey};
use crate::http::{Request, Response, ResponseSnapshot, ResponseSource, Transport};
use crate::lifetime::Lifetime;
use crate::queue::{ActionQueue, NewAction};

const OFFLINE_MESSAGE: &str = "You are offline. Please check your internet connection.";

/// Which strategy handles a request. Variants are listed in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Live-data host: network only, never cached
  Bypass,
  /// State-changing call, including form submits: network, queued for
  /// replay when unreachable, never cached
  Mutation,
  /// Full-page load: network first, then cache, then offline document
  Navigation,
  /// Everything else: cache first with background refresh
  StaticAsset,
}

pub struct CacheRouter {
  /// Generation read from and written to; a miss until it is active
  version: String,
  storage: Arc<dyn CacheStorage>,
  transport: Arc<dyn Transport>,
  queue: Arc<ActionQueue>,
  manifest: Arc<PrecacheManifest>,
  bypass_hosts: Vec<String>,
}

impl CacheRouter {
  pub fn new(
    version: impl Into<String>,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
    queue: Arc<ActionQueue>,
    manifest: Arc<PrecacheManifest>,
    bypass_hosts: Vec<String>,
  ) -> Self {
    let bypass_hosts = bypass_hosts
      .into_iter()
      .map(|h| h.trim().to_ascii_lowercase())
      .filter(|h| !h.is_empty())
      .collect();
    Self {
      version: version.into(),
      storage,
      transport,
      queue,
      manifest,
      bypass_hosts,
    }
  }

  pub fn classify(&self, request: &Request) -> RouteClass {
    if self.is_bypass_host(request) {
      RouteClass::Bypass
    } else if request.is_mutating() {
      RouteClass::Mutation
    } else if request.is_navigation() {
      RouteClass::Navigation
    } else {
      RouteClass::StaticAsset
    }
  }

  fn is_bypass_host(&self, request: &Request) -> bool {
    let Some(host) = request.host() else {
      return false;
    };
    let host = host.to_ascii_lowercase();
    self.bypass_hosts.iter().any(|fragment| host.contains(fragment.as_str()))
  }

  /// Resolve an intercepted request. Never fails.
  pub async fn handle(&self, request: Request, lifetime: &Lifetime) -> Response {
    let class = self.classify(&request);
    debug!("{} {} -> {:?}", request.method, request.url, class);

    match class {
      RouteClass::Bypass => self.network_only(request).await,
      RouteClass::Mutation => self.network_or_enqueue(request).await,
      RouteClass::Navigation => self.network_first(request, lifetime).await,
      RouteClass::StaticAsset => self.cache_first(request, lifetime).await,
    }
  }

  async fn network_only(&self, request: Request) -> Response {
    match self.transport.send(request).await {
      Ok(response) => response,
      Err(e) => {
        debug!("Live-data request failed: {}", e);
        offline_error()
      }
    }
  }

  async fn network_first(&self, request: Request, lifetime: &Lifetime) -> Response {
    let key = RequestKey::from_request(&request);
    match self.transport.send(request).await {
      Ok(response) => self.store_in_background(key, response, lifetime),
      Err(e) => {
        debug!("Navigation to {} failed, trying cache: {}", key, e);
        match self.cached(&key).await {
          Some(cached) => cached,
          None => self.fallback().await,
        }
      }
    }
  }

  async fn network_or_enqueue(&self, request: Request) -> Response {
    let action = NewAction::from_request(&request);
    match self.transport.send(request).await {
      Ok(response) => response,
      Err(e) if e.is_connectivity() => {
        let target = format!("{} {}", action.method, action.url);
        match self.queue.enqueue(action).await {
          Ok(id) => Response::json(202, &json!({ "queued": true, "id": id.0 }))
            .with_source(ResponseSource::Synthetic),
          Err(store_err) => {
            warn!("Could not queue {}: {}", target, store_err);
            offline_error()
          }
        }
      }
      Err(e) => {
        warn!("Mutation failed: {}", e);
        offline_error()
      }
    }
  }

  async fn cache_first(&self, request: Request, lifetime: &Lifetime) -> Response {
    let key = RequestKey::from_request(&request);

    if let Some(cached) = self.cached(&key).await {
      // Refresh for next time; the stale copy is returned either way
      let storage = Arc::clone(&self.storage);
      let transport = Arc::clone(&self.transport);
      let version = self.version.clone();
      lifetime.wait_until(async move {
        match transport.send(request).await {
          Ok(response) if response.is_success() => {
            store_snapshot(storage.as_ref(), &version, &key, response.into_snapshot()).await
          }
          Ok(response) => debug!(
            "Refresh of {} returned {}, keeping cached copy",
            key,
            response.status()
          ),
          Err(e) => debug!("Refresh of {} failed: {}", key, e),
        }
      });
      return cached;
    }

    match self.transport.send(request).await {
      Ok(response) => self.store_in_background(key, response, lifetime),
      Err(e) => {
        debug!("Fetch of {} failed with nothing cached: {}", key, e);
        Response::text(503, "Offline").with_source(ResponseSource::Synthetic)
      }
    }
  }

  /// Return `response` to the caller and write a copy into the current
  /// generation in the background. Only 2xx answers to GET are stored.
  fn store_in_background(
    &self,
    key: RequestKey,
    response: Response,
    lifetime: &Lifetime,
  ) -> Response {
    if !response.is_success() || key.method() != Method::GET.as_str() {
      return response;
    }

    let (returned, stored) = response.tee();
    let storage = Arc::clone(&self.storage);
    let version = self.version.clone();
    lifetime.wait_until(async move {
      store_snapshot(storage.as_ref(), &version, &key, stored.into_snapshot()).await;
    });
    returned
  }

  async fn cached(&self, key: &RequestKey) -> Option<Response> {
    let snapshot = self.lookup(key).await?;
    Some(Response::from_snapshot(snapshot, ResponseSource::Cache))
  }

  /// Entry for `key` in the configured generation. Storage errors count as
  /// a miss.
  async fn lookup(&self, key: &RequestKey) -> Option<ResponseSnapshot> {
    match self.storage.lookup_active(&self.version, key).await {
      Ok(found) => found,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", key, e);
        None
      }
    }
  }

  /// The offline document from the current generation, or straight from
  /// configuration when it is not cached.
  async fn fallback(&self) -> Response {
    match self.lookup(&self.manifest.offline_key).await {
      Some(snapshot) => Response::from_snapshot(snapshot, ResponseSource::Fallback),
      None => self.manifest.fallback_response(),
    }
  }
}

/// Structured 503 for live calls that could not be made.
fn offline_error() -> Response {
  Response::json(503, &json!({ "error": OFFLINE_MESSAGE })).with_source(ResponseSource::Synthetic)
}

/// Last write wins; failures are logged and dropped.
async fn store_snapshot(
  storage: &dyn CacheStorage,
  generation: &str,
  key: &RequestKey,
  snapshot: ResponseSnapshot,
) {
  match storage.put(generation, key, snapshot).await {
    Ok(()) => debug!("Cached {} in {}", key, generation),
    Err(e) => warn!("Failed to cache {}: {}", key, e),
  }
}
