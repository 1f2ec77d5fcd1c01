//! Logging setup for the `churnprep` binary.
//!
//! The library only emits `tracing` events. [`init`] installs a subscriber
//! that writes them to the console and to two daily rolling files:
//!
//! - `churnprep.<date>.log`: every level passing `RUST_LOG` (default `info`)
//! - `error.<date>.log`: warnings and errors only
//!
//! ```no_run
//! churnprep::logging::init(None)?;
//! tracing::info!("pipeline starting");
//! # Ok::<(), churnprep::error::PipelineError>(())
//! ```

use crate::error::{PipelineError, Result, ResultExt as _};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

const LOG_PREFIX: &str = "churnprep";
const ERROR_LOG_PREFIX: &str = "error";
const MAX_LOG_FILES: usize = 10;

/// Platform log directory, created when missing.
///
/// - Windows: `%APPDATA%/churnprep/logs`
/// - macOS: `~/Library/Application Support/churnprep/logs`
/// - Linux: `~/.local/share/churnprep/logs`
pub fn get_log_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir()
        .ok_or_else(|| PipelineError::Config("Failed to determine data directory".to_owned()))?;
    ensure_dir(base_dir.join(LOG_PREFIX).join("logs"))
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    }
    Ok(dir)
}

fn appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| PipelineError::Config(format!("Failed to create {prefix} log appender: {e}")))
}

/// Install the console and file subscriber; returns the log directory.
///
/// `log_dir` overrides the platform directory.
pub fn init(log_dir: Option<&Path>) -> Result<PathBuf> {
    let log_dir = match log_dir {
        Some(dir) => ensure_dir(dir.to_path_buf())?,
        None => get_log_dir()?,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| PipelineError::Config(format!("Failed to create env filter: {e}")))?;

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .pretty();

    let all_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(appender(&log_dir, LOG_PREFIX)?);

    let error_logs_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(appender(&log_dir, ERROR_LOG_PREFIX)?)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(all_logs_layer)
        .with(error_logs_layer)
        .try_init()
        .map_err(|e| PipelineError::Config(format!("Logging already initialized: {e}")))?;

    tracing::info!(log_dir = %log_dir.display(), "logging initialized");
    Ok(log_dir)
}

/// Today's main log file inside `log_dir`.
pub fn current_log_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d");
    log_dir.join(format!("{LOG_PREFIX}.{today}.log"))
}

/// Today's error log file inside `log_dir`.
pub fn current_error_log_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d");
    log_dir.join(format!("{ERROR_LOG_PREFIX}.{today}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_names() {
        let dir = Path::new("/tmp/logs");
        let main = current_log_path(dir);
        let errors = current_error_log_path(dir);

        let main_name = main.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(main_name.starts_with("churnprep.") && main_name.ends_with(".log"));
        assert!(errors.starts_with(dir));
        assert!(errors.to_string_lossy().contains("error."));
    }

    #[test]
    fn test_ensure_dir_creates_nested() -> anyhow::Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let dir = ensure_dir(tmp.path().join("a").join("b"))?;
        assert!(dir.is_dir());
        Ok(())
    }
}
