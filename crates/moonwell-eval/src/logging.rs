//! Logging setup for embedders.

use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Does nothing if a
/// global subscriber is already installed.
pub fn init(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = %config.log_filter, "logging initialized");
    }
}
