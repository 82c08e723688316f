//! Logging initialization.
//!
//! Structured JSON lines on stderr. `RUST_LOG` wins over the configured level.

use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Builds the subscriber without installing it.
pub fn subscriber(level: &str) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .finish()
}

/// Installs the global subscriber.
///
/// # Example
///
/// ```ignore
/// outbox_dispatch::logging::init_logging("info");
/// tracing::info!("Dispatcher started");
/// ```
pub fn init_logging(level: &str) {
    if subscriber(level).try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
