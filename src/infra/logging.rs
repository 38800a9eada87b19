//! Tracing subscriber setup shared by the binaries

use anyhow::Context;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Where log output goes
pub enum LogSink<'a> {
    /// Standard error, for headless binaries
    Stderr,
    /// Append to a file, for the terminal UI which owns the screen
    File(&'a str),
}

/// Initialize structured logging with configurable level via RUST_LOG env var
///
/// Default: INFO, use RUST_LOG=debug for frame-level stream visibility
pub fn init_tracing(sink: LogSink<'_>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match sink {
        LogSink::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(UtcTime::rfc_3339())
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogSink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(UtcTime::rfc_3339())
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
    }

    Ok(())
}
