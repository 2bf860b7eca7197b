//! Cache generation lifecycle: `absent -> installing -> active -> superseded (deleted)`.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::key::RequestKey;
use super::manifest::{PrecacheAsset, PrecacheManifest};
use super::storage::{CacheStorage, GenerationInfo, GenerationState};
use crate::error::{OfflineError, OfflineResult};
use crate::http::{Request, ResponseSnapshot, Transport};

/// Outcome of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Generations deleted because they were not current
  pub purged: Vec<String>,
}

/// Installs and activates the configured cache generation.
pub struct Lifecycle {
  version: String,
  manifest: Arc<PrecacheManifest>,
  storage: Arc<dyn CacheStorage>,
  transport: Arc<dyn Transport>,
}

impl Lifecycle {
  pub fn new(
    version: impl Into<String>,
    manifest: Arc<PrecacheManifest>,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self {
      version: version.into(),
      manifest,
      storage,
      transport,
    }
  }

  /// Populate the configured generation with every mandatory asset and the
  /// offline document.
  ///
  /// All assets are fetched before anything is written. If any fetch fails,
  /// nothing is stored, a freshly created generation is removed again and the
  /// previously active generation keeps serving.
  pub async fn install(&self) -> OfflineResult<()> {
    let state = self.storage.open(&self.version).await?;
    info!(
      "Installing cache generation {} ({} assets)",
      self.version,
      self.manifest.assets.len()
    );
    if let Ok(Some(current)) = self.storage.active_generation().await {
      if current != self.version {
        info!("Generation {} keeps serving until {} is activated", current, self.version);
      }
    }

    let result = self.populate().await;

    match (result, state) {
      (Ok(()), GenerationState::Active) => {
        info!("Refreshed active generation {}", self.version);
        Ok(())
      }
      (Ok(()), _) => {
        self
          .storage
          .set_state(&self.version, GenerationState::Installed)
          .await?;
        info!("Installed cache generation {}", self.version);
        Ok(())
      }
      (Err(e), GenerationState::Active) => {
        warn!("Refresh of active generation {} failed: {}", self.version, e);
        Err(e)
      }
      (Err(e), _) => {
        warn!("Install of {} failed, discarding: {}", self.version, e);
        if let Err(cleanup) = self.storage.delete(&self.version).await {
          warn!("Failed to discard partial generation {}: {}", self.version, cleanup);
        }
        Err(e)
      }
    }
  }

  async fn populate(&self) -> OfflineResult<()> {
    let mut entries =
      try_join_all(self.manifest.assets.iter().map(|asset| self.fetch_asset(asset))).await?;

    let offline = self.manifest.fallback_response().into_snapshot();
    entries.push((self.manifest.offline_key.clone(), offline));

    self.storage.put_all(&self.version, entries).await
  }

  async fn fetch_asset(&self, asset: &PrecacheAsset) -> OfflineResult<(RequestKey, ResponseSnapshot)> {
    let request = Request::get(asset.url.clone()).with_header("accept", asset.content_type.clone());
    let response = self.transport.send(request).await?;
    if !response.is_success() {
      return Err(OfflineError::UpstreamError {
        status: response.status(),
      });
    }

    let mut snapshot = response.into_snapshot();
    if !snapshot.headers.contains("content-type") {
      snapshot.headers.insert("content-type", asset.content_type.clone());
    }
    Ok((asset.key(), snapshot))
  }

  /// Make the configured generation current and delete every other one.
  ///
  /// Only an installed (or already active) generation can be activated.
  /// Purge failures are logged; the generation still becomes current.
  pub async fn activate(&self) -> OfflineResult<ActivationReport> {
    let state = self
      .storage
      .generations()
      .await?
      .into_iter()
      .find(|g| g.name == self.version)
      .map(|g| g.state);

    match state {
      Some(GenerationState::Installed) | Some(GenerationState::Active) => {}
      Some(other) => {
        return Err(OfflineError::NotFound(format!(
          "generation {} is {}, not installed",
          self.version, other
        )))
      }
      None => {
        return Err(OfflineError::NotFound(format!(
          "generation {} has not been installed",
          self.version
        )))
      }
    }

    self
      .storage
      .set_state(&self.version, GenerationState::Active)
      .await?;

    let mut report = ActivationReport::default();
    for name in self.storage.generation_names().await? {
      if name == self.version {
        continue;
      }
      info!("Deleting old cache: {}", name);
      match self.storage.delete(&name).await {
        Ok(_) => report.purged.push(name),
        Err(e) => warn!("Failed to delete old cache {}: {}", name, e),
      }
    }

    info!("Activated cache generation {}", self.version);
    Ok(report)
  }

  pub async fn generations(&self) -> OfflineResult<Vec<GenerationInfo>> {
    self.storage.generations().await
  }
}
