//! Tracing subscriber setup

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogConfig, LogFormat};

const LOG_FILE_PREFIX: &str = "hercules-base.log";

/// Install the global subscriber.
///
/// The returned guard flushes buffered log lines when dropped; keep it alive
/// for the lifetime of the process.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<WorkerGuard> {
    let (writer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let registry = tracing_subscriber::registry().with(build_env_filter(&config.level));

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(config.dir.is_none()),
            )
            .try_init()?,
    }

    Ok(guard)
}

/// `RUST_LOG` wins; otherwise our crate logs at `level` and dependencies at warn
fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: &str) -> String {
    format!("warn,hercules_base={level}")
}
