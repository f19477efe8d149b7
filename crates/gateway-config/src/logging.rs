//! Process-wide `tracing` initialization, gated behind the `tracing-init` feature so that
//! library consumers of this crate (e.g. `gateway-adapters`) don't pay for a subscriber
//! they'll never install.

use std::path::Path;

use thiserror::Error;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("create log directory {0}: {1}")]
    CreateDir(std::path::PathBuf, std::io::Error),
    #[error("install global tracing subscriber")]
    SetGlobalDefault(#[from] tracing_subscriber::util::TryInitError),
}

/// Options for [`init`]. `env_filter` honors `RUST_LOG`, falling back to `info` when unset.
pub struct LoggingOptions<'a> {
    /// Emit one JSON object per line instead of the human-readable formatter. Use for production
    /// deployments whose log collector parses structured fields.
    pub json: bool,
    /// When set, also write to a daily-rotating file under this directory (in addition to stderr).
    pub file_dir: Option<&'a Path>,
}

impl Default for LoggingOptions<'_> {
    fn default() -> Self {
        Self { json: false, file_dir: None }
    }
}

type BoxLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global `tracing` subscriber. Call once at process start, before spawning any
/// adapters or the HTTP server — later calls are rejected by `tracing`'s global-default guard.
///
/// Returns the file-appender guard when `file_dir` is set; the caller must keep it alive for the
/// life of the process, or buffered log lines are dropped on drop.
pub fn init(
    opts: LoggingOptions<'_>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer: BoxLayer = if opts.json {
        Box::new(fmt::layer().json().with_writer(std::io::stderr))
    } else {
        Box::new(fmt::layer().with_writer(std::io::stderr))
    };

    let (file_layer, guard): (Option<BoxLayer>, _) = match opts.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| LoggingError::CreateDir(dir.to_path_buf(), e))?;
            let appender = tracing_appender::rolling::daily(dir, "gateway.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer: BoxLayer = if opts.json {
                Box::new(fmt::layer().json().with_writer(non_blocking).with_ansi(false))
            } else {
                Box::new(fmt::layer().with_writer(non_blocking).with_ansi(false))
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
