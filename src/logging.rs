use crate::config::data_root;
use anyhow::{Context, Result};
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "nvr-live.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs to stderr. Used by the one-shot commands.
pub fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Logs to `nvr-live.log` in the data directory, since the live screen owns
/// the terminal. Keep the guard alive until exit or buffered lines are lost.
pub fn init_file() -> Result<WorkerGuard> {
    let dir = data_root()?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed creating log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(guard)
}
