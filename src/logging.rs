//! Process-wide tracing setup for the ledger binary

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Crates whose INFO output drowns the ledger's own events
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "rustls=warn"];

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    let (dir, file) = (&config.log_dir, &config.log_file);
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(dir, file),
        "daily" => tracing_appender::rolling::daily(dir, file),
        _ => tracing_appender::rolling::never(dir, file),
    }
}

/// Filter directive: configured level plus the quiet targets
fn default_directive(config: &AppConfig) -> String {
    std::iter::once(config.log_level.as_str())
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// file writer on drop; keep it alive for the whole process.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(file_appender(config));

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(config))
            .with_context(|| format!("invalid log_level '{}'", config.log_level))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.use_json {
        // Targets stay in JSON so log queries can select by module
        registry
            .with(fmt::layer().json().with_target(true).with_writer(writer).with_ansi(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false).with_ansi(true))
            .try_init()
    };
    installed.context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
