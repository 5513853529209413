//! Tracing subscriber setup for the binary.

use anyhow::{Context, Result};
use campusvault_service::LoggingConfig;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. When `log_file` is given, events are
/// also appended to it without ANSI colours.
pub fn init(config: &LoggingConfig, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level `{}`", config.level))?;

    let console = if config.format == "json" {
        fmt::layer().json().with_target(false).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let file = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(open_append(path)?))
                .boxed(),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init()
        .context("failed to install tracing subscriber")?;

    if let Some(path) = log_file {
        tracing::info!(path = %path.display(), "Logging to file");
    }
    Ok(())
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
