//! Subscriber installation
//!
//! Human-readable events always go to stderr. With `logging.local_enabled`,
//! the same events are also written as JSON lines to a rolling file in
//! `logging.local_path`, through a non-blocking writer whose guard lives in
//! [`LoggingGuard`].

use crate::config::LoggingConfig;
use crate::domain::{PdrError, Result};
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log file name prefix inside `logging.local_path`
const LOG_FILE_PREFIX: &str = "pdr.log";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Flushes the file writer when dropped; hold it until the process exits
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Errors
///
/// Returns a configuration error for an unknown level or rotation, a log
/// directory that cannot be created, or when a global subscriber is already
/// installed.
pub fn init_logging(level: &str, config: &LoggingConfig) -> Result<LoggingGuard> {
    let level = parse_log_level(level)?;
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("pdr_ingest={level},pdr={level}")))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(filter())
        .boxed();
    let mut layers = vec![console];

    let file_guard = match config.local_enabled {
        true => {
            let (layer, guard) = json_file_layer(config)?;
            layers.push(layer.with_filter(filter()).boxed());
            Some(guard)
        }
        false => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| PdrError::Configuration(format!("Failed to install logger: {e}")))?;

    tracing::debug!(
        file_logging = config.local_enabled,
        directory = %config.local_path,
        rotation = %config.local_rotation,
        "Logging ready"
    );

    Ok(LoggingGuard { _file: file_guard })
}

fn json_file_layer<S>(config: &LoggingConfig) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let rotation = parse_rotation(&config.local_rotation)?;
    std::fs::create_dir_all(&config.local_path).map_err(|e| {
        PdrError::Configuration(format!(
            "Cannot create log directory {}: {e}",
            config.local_path
        ))
    })?;

    let appender = RollingFileAppender::new(rotation, &config.local_path, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_writer(writer)
        .boxed();
    Ok((layer, guard))
}

fn parse_log_level(level: &str) -> Result<Level> {
    level.trim().parse::<Level>().map_err(|_| {
        PdrError::Configuration(format!(
            "Unknown log level '{level}' (expected trace, debug, info, warn or error)"
        ))
    })
}

fn parse_rotation(rotation: &str) -> Result<Rotation> {
    match rotation {
        "daily" => Ok(Rotation::DAILY),
        "hourly" => Ok(Rotation::HOURLY),
        other => Err(PdrError::Configuration(format!(
            "Unknown log rotation '{other}' (expected daily or hourly)"
        ))),
    }
}
