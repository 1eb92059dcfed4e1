//! Structured logging setup
//!
//! - JSON formatted logs to a size- and day-rotated file under `./logs`
//! - Human-readable console output
//! - Level filtering via `RUST_LOG`

use anyhow::Result;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_DIR: &str = "./logs";
const LOG_FILE: &str = "regwatch.log";
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const MAX_ROTATED_FILES: usize = 9;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "regwatch_server=debug,regwatch_core=debug,actix_web=info";

/// Install the global subscriber.
///
/// Returns a guard that must be kept alive to ensure logs are flushed
pub fn init_telemetry() -> Result<WorkerGuard> {
    let log_dir = Path::new(LOG_DIR);
    std::fs::create_dir_all(log_dir)?;

    // regwatch.log.YYYY-MM-DD, rotated at 10MB or daily
    let file_appender = RollingFileAppender::new(
        log_dir.join(LOG_FILE),
        RollingConditionBasic::new().daily().max_size(MAX_LOG_BYTES),
        MAX_ROTATED_FILES,
    )?;

    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_target(true)
        .with_thread_ids(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!("Logging to {:?}/{}", log_dir, LOG_FILE);

    Ok(guard)
}
