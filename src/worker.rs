//! The offline worker: reacts to lifecycle triggers delivered by the host.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{ActivationReport, CacheStorage, GenerationInfo, Lifecycle, PrecacheManifest};
use crate::config::Config;
use crate::error::OfflineResult;
use crate::http::{Request, Response, Transport};
use crate::lifetime::Lifetime;
use crate::queue::{ActionQueue, ActionStore, ReplayReport};
use crate::router::CacheRouter;

pub struct OfflineWorker {
  lifecycle: Lifecycle,
  router: CacheRouter,
  queue: Arc<ActionQueue>,
  sync_tag: String,
  skip_waiting: bool,
}

impl OfflineWorker {
  pub fn new(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    actions: Arc<dyn ActionStore>,
    transport: Arc<dyn Transport>,
  ) -> Result<Self> {
    let manifest = Arc::new(PrecacheManifest::from_config(config)?);
    let queue = Arc::new(ActionQueue::new(actions, Arc::clone(&transport)));

    let lifecycle = Lifecycle::new(
      config.cache_version.clone(),
      Arc::clone(&manifest),
      Arc::clone(&storage),
      Arc::clone(&transport),
    );
    let router = CacheRouter::new(
      config.cache_version.clone(),
      storage,
      transport,
      Arc::clone(&queue),
      manifest,
      config.bypass_hosts.clone(),
    );

    Ok(Self {
      lifecycle,
      router,
      queue,
      sync_tag: config.sync_tag.clone(),
      skip_waiting: config.skip_waiting,
    })
  }

  /// Install the configured generation, activating it right away when
  /// `skip_waiting` is set.
  pub async fn on_install(&self) -> OfflineResult<Option<ActivationReport>> {
    self.lifecycle.install().await?;
    if self.skip_waiting {
      return self.on_activate().await.map(Some);
    }
    Ok(None)
  }

  pub async fn on_activate(&self) -> OfflineResult<ActivationReport> {
    self.lifecycle.activate().await
  }

  /// Answer an intercepted request. Side effects are registered on `lifetime`.
  pub async fn on_fetch(&self, request: Request, lifetime: &Lifetime) -> Response {
    self.router.handle(request, lifetime).await
  }

  /// Replay the queue when the trigger carries the configured tag.
  pub async fn on_sync(&self, tag: &str) -> Option<ReplayReport> {
    if tag != self.sync_tag {
      debug!("Ignoring sync trigger with tag '{}'", tag);
      return None;
    }
    Some(self.on_connectivity_restored().await)
  }

  pub async fn on_connectivity_restored(&self) -> ReplayReport {
    info!("Connectivity restored, replaying pending actions");
    self.queue.replay_all().await
  }

  pub fn queue(&self) -> &ActionQueue {
    &self.queue
  }

  pub async fn generations(&self) -> OfflineResult<Vec<GenerationInfo>> {
    self.lifecycle.generations().await
  }
}
