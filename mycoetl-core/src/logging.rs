//! Tracing setup: human-readable stderr output plus a structured JSON file.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{EtlError, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Resolve the stderr filter directive from config and CLI verbosity flags.
///
/// `-v` / `-vv` raise the configured level; `--quiet` wins over both.
pub fn filter_directive(config: &LoggingConfig, verbosity: u8, quiet: bool) -> String {
    if quiet {
        return "error".to_string();
    }
    match verbosity {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Split the configured log file into the rolling appender's directory and prefix.
fn appender_target(file: &Path) -> (PathBuf, String) {
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("etl_pipeline.log")
        .to_string();
    (dir, prefix)
}

/// Install the global subscriber.
///
/// The returned guard flushes the JSON file writer on drop and must be held
/// for the lifetime of the process.
pub fn init(config: &LoggingConfig, verbosity: u8, quiet: bool) -> Result<Option<WorkerGuard>> {
    let filter = filter_directive(config, verbosity, quiet);
    EnvFilter::try_new(&filter)
        .map_err(|e| EtlError::config(format!("invalid log level '{filter}': {e}")))?;

    let stderr_layer = match config.format {
        LogFormat::Full => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    }
    .with_filter(EnvFilter::new(&filter));

    let (file_layer, guard) = if config.file_enabled {
        let (dir, prefix) = appender_target(&config.file);
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| EtlError::config(format!("logging already initialized: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        let config = LoggingConfig::default();
        assert_eq!(filter_directive(&config, 0, false), "info");
        assert_eq!(filter_directive(&config, 1, false), "debug");
        assert_eq!(filter_directive(&config, 3, false), "trace");
        assert_eq!(filter_directive(&config, 2, true), "error");
    }

    #[test]
    fn test_appender_target() {
        let (dir, prefix) = appender_target(Path::new("logs/etl_pipeline.log"));
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(prefix, "etl_pipeline.log");

        let (dir, _) = appender_target(Path::new("bare.log"));
        assert_eq!(dir, PathBuf::from("."));
    }
}
