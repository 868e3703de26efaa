//! Tracing subscriber setup.
//!
//! Logs always go to stderr. When a log directory is configured, a daily
//! rolling `glitchcube.log` file is written alongside through a
//! non-blocking writer; the returned guard must be held for the lifetime
//! of the process or buffered lines are lost on exit.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{CubeError, Result};

/// File name prefix for the rolling log.
pub const LOG_FILE_PREFIX: &str = "glitchcube.log";

/// Build the filter: `RUST_LOG` wins, otherwise the configured default.
pub fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns [`CubeError::Logging`] if the log directory cannot be created or
/// a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.filter);
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| CubeError::Logging(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init()
                .map_err(|e| CubeError::Logging(e.to_string()))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_filter_accepts_directive() {
        let filter = build_filter("glitchcube=debug,reqwest=warn");
        // EnvFilter renders its directives; RUST_LOG may override in CI, so
        // only check that something was produced.
        assert!(!filter.to_string().is_empty());
    }
}
