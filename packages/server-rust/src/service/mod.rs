//! Service surface of the mediation layer: configuration, the built-in
//! request handlers and the config change signal.

pub mod config;
pub mod notify;
pub mod requests;

pub use config::ServiceConfig;
pub use notify::ConfigChangeNotifier;
