//! Logging setup: stderr plus a daily-rolling log file.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "errands-offline.log";

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// level. Keep the returned guard alive until exit so buffered lines flush.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = fmt::layer()
    .with_writer(non_blocking)
    .with_ansi(false)
    .with_target(false);
  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
