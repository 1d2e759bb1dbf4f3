use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
/// The file layer writes JSON lines with daily rotation; the directory
/// can be overridden with FINSIFT_LOG_DIR.
pub fn init_logging() {
    let log_dir = std::env::var("FINSIFT_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _ = fs::create_dir_all(&log_dir);

    // Non-blocking file appender with daily log rotation
    let file_appender = tracing_appender::rolling::daily(&log_dir, "finsift.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    // Console output stays human-readable
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("finsift=info".parse().unwrap()))
        .with(file_layer)
        .with(console_layer)
        .init();

    // The guard must outlive the process so logs are flushed on exit
    std::mem::forget(_guard);
}
