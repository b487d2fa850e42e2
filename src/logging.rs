//! `tracing` subscribers for the bot and the maintenance commands.
//!
//! The bot writes JSON lines to a daily file and plain text to stderr.
//! `reset` and `stats` only log to stderr.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// File name prefix of the rolling log.
pub const LOG_FILE_PREFIX: &str = "tetatet.log";

/// Used when `RUST_LOG` is unset. sqlx logs every statement at info and
/// teloxide logs every polling hiccup.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,teloxide=warn";

/// Keeps the file writer's background thread alive; hold it until exit.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the bot's subscriber: JSON into `{logs_dir}/tetatet.log.<date>`
/// plus human-readable stderr.
///
/// # Errors
///
/// Fails if `logs_dir` cannot be created or a subscriber is already set.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().with_writer(writer))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LoggingGuard { _writer: guard })
}

/// Install a stderr-only subscriber. Later calls are no-ops.
pub fn init_cli() {
    let _ = fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init();
}
