//! Error kinds shared by the cache router and the action queue.

use thiserror::Error;

/// Failures the offline layer distinguishes between.
///
/// Only `ConnectivityFailure` triggers fallback and queueing paths.
/// `StorageFailure` is logged and treated as best-effort by callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfflineError {
  /// Network unreachable, connection refused or timed out.
  #[error("connectivity failure: {0}")]
  ConnectivityFailure(String),

  /// No cached entry or stored record for the given key.
  #[error("not found: {0}")]
  NotFound(String),

  /// Durable read or write failed.
  #[error("storage failure: {0}")]
  StorageFailure(String),

  /// The live server answered with a non-2xx status.
  #[error("upstream returned status {status}")]
  UpstreamError { status: u16 },
}

impl OfflineError {
  pub fn storage(err: impl std::fmt::Display) -> Self {
    Self::StorageFailure(err.to_string())
  }

  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::ConnectivityFailure(_))
  }
}

impl From<rusqlite::Error> for OfflineError {
  fn from(err: rusqlite::Error) -> Self {
    Self::storage(err)
  }
}

impl From<tokio::task::JoinError> for OfflineError {
  fn from(err: tokio::task::JoinError) -> Self {
    Self::StorageFailure(format!("storage task failed: {}", err))
  }
}

pub type OfflineResult<T> = std::result::Result<T, OfflineError>;
