use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "OFFCART_LOG";

/// Install the global subscriber.
///
/// Logs go to a daily rolling file under `log_dir`; with `verbose` they are
/// mirrored to stderr. Keep the returned guard alive until exit or buffered
/// lines are lost.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offcart.log");
  let (file_writer, guard) = tracing_appender::non_blocking(appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer);
  let stderr_layer = verbose.then(|| {
    tracing_subscriber::fmt::layer()
      .with_target(false)
      .with_writer(std::io::stderr)
  });

  tracing_subscriber::registry()
    .with(filter())
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}
