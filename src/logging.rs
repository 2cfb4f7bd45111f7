//! Tracing setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
  /// Append to `storeguard.log` in the data directory
  File,
  Stderr,
}

/// Directory holding the log file.
pub fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("storeguard"))
}

/// Filter from STOREGUARD_LOG, then RUST_LOG, defaulting to `info`.
fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env("STOREGUARD_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes buffered lines on drop; keep it alive for the
/// life of the program.
pub fn init(target: LogTarget) -> Result<WorkerGuard> {
  let (writer, guard) = match target {
    LogTarget::File => {
      let dir = log_dir()?;
      std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "storeguard.log"))
    }
    LogTarget::Stderr => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::registry()
    .with(env_filter())
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(target == LogTarget::Stderr),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
