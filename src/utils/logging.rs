// src/utils/logging.rs
//! Logging utilities for the application.
//!
//! This module provides functions for initializing and configuring
//! the logging system.

use std::io;
use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with console output
pub fn init_logging(log_level: &str) -> io::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::new(log_level), // Use provided level as fallback
    };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(io::stdout);

    tracing_subscriber::registry()
        .with(console_layer.with_filter(filter))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Sets up file-based logging in addition to console output.
///
/// The returned guard must stay alive for the lifetime of the process,
/// otherwise buffered log lines are dropped on exit.
pub fn init_file_logging(log_level: &str, log_file: &str) -> io::Result<WorkerGuard> {
    let filter = EnvFilter::new(log_level);

    let log_path = Path::new(log_file);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let log_prefix = log_path
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("peerlink"))
        .to_os_string();

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_writer(non_blocking_writer)
        .with_ansi(false);

    let console_layer = fmt::layer().with_writer(io::stdout).with_ansi(true);

    tracing_subscriber::registry()
        .with(file_layer.with_filter(filter))
        .with(console_layer)
        .try_init()
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to set global default subscriber: {}", e),
            )
        })?;

    Ok(guard)
}
