//! Lifetime extension for event handlers.
//!
//! A handler registers side-effect work (cache writes, refreshes) with
//! [`Lifetime::wait_until`] and returns immediately. The host awaits
//! [`Lifetime::settled`] before it treats the event as finished and may shut
//! the process down.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Clone, Default)]
pub struct Lifetime {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Lifetime {
  pub fn new() -> Self {
    Self::default()
  }

  fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Run `work` in the background and keep the event alive until it ends.
  pub fn wait_until<F>(&self, work: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.tasks().spawn(work);
  }

  /// Wait for every registered task, including ones registered while waiting.
  pub async fn settled(&self) {
    loop {
      let mut batch = std::mem::take(&mut *self.tasks());
      if batch.is_empty() {
        return;
      }
      while let Some(result) = batch.join_next().await {
        if let Err(e) = result {
          warn!("Background task did not complete: {}", e);
        }
      }
    }
  }
}
