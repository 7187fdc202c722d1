//! Service-level configuration: bus names, timeouts and logging.

use std::time::Duration;

use clap::Parser;

use crate::logging::{self, LogFormat, LoggingError};

pub const DEFAULT_SERVICE: &str = "com.nokia.mce";
pub const DEFAULT_REQUEST_PATH: &str = "/com/nokia/mce/request";
pub const DEFAULT_REQUEST_INTERFACE: &str = "com.nokia.mce.request";
pub const DEFAULT_SIGNAL_PATH: &str = "/com/nokia/mce/signal";
pub const DEFAULT_SIGNAL_INTERFACE: &str = "com.nokia.mce.signal";
pub const DEFAULT_ERROR_NAME: &str = "com.nokia.mce.GConf.Error";

/// Names and settings the mediation layer uses on the bus.
///
/// Parses from the command line (with an environment fallback for the service
/// name); `Default` gives the stock names.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "mcebus", about = "Bus mediation layer for the mode control entity")]
pub struct ServiceConfig {
    /// Well-known bus name to own.
    #[arg(long, env = "MCEBUS_SERVICE", default_value = DEFAULT_SERVICE)]
    pub service_name: String,
    /// Object path receiving requests.
    #[arg(long, default_value = DEFAULT_REQUEST_PATH)]
    pub request_path: String,
    /// Interface of the request methods.
    #[arg(long, default_value = DEFAULT_REQUEST_INTERFACE)]
    pub request_interface: String,
    /// Object path signals are emitted from.
    #[arg(long, default_value = DEFAULT_SIGNAL_PATH)]
    pub signal_path: String,
    /// Interface of emitted signals.
    #[arg(long, default_value = DEFAULT_SIGNAL_INTERFACE)]
    pub signal_interface: String,
    /// Error name for store and marshaling failures.
    #[arg(long, default_value = DEFAULT_ERROR_NAME)]
    pub error_name: String,
    /// Version string returned by `get_version`.
    #[arg(id = "service_version", long = "service-version", default_value = env!("CARGO_PKG_VERSION"))]
    pub version: String,
    /// Default timeout for blocking calls, in milliseconds.
    #[arg(long, default_value_t = 25_000)]
    pub call_timeout_ms: u64,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
    /// Filter directive used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

impl ServiceConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Installs the global tracing subscriber with the configured format and
    /// fallback filter.
    ///
    /// # Errors
    ///
    /// See [`logging::init_tracing`].
    pub fn init_logging(&self) -> Result<(), LoggingError> {
        logging::init_tracing(self.log_format, &self.log_filter)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE.to_string(),
            request_path: DEFAULT_REQUEST_PATH.to_string(),
            request_interface: DEFAULT_REQUEST_INTERFACE.to_string(),
            signal_path: DEFAULT_SIGNAL_PATH.to_string(),
            signal_interface: DEFAULT_SIGNAL_INTERFACE.to_string(),
            error_name: DEFAULT_ERROR_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            call_timeout_ms: 25_000,
            log_format: LogFormat::Pretty,
            log_filter: "info".to_string(),
        }
    }
}
