//! Tracing subscriber setup.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Errors from installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("a global subscriber is already installed")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Builds the filter: `RUST_LOG` when set and valid, otherwise
/// `default_directive`.
///
/// # Errors
///
/// Returns `LoggingError::Filter` if `default_directive` is needed and does
/// not parse.
pub fn env_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_directive)?),
    }
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Fails on an unparsable filter or when a global subscriber is already
/// installed (e.g. on a second call).
pub fn init_tracing(format: LogFormat, default_directive: &str) -> Result<(), LoggingError> {
    let filter = env_filter(default_directive)?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?,
    }

    tracing::info!(?format, "logging initialized");
    Ok(())
}
