//! Tracing subscriber setup for the daemon.

use tracing_subscriber::EnvFilter;

/// Initialize logging once at startup. `RUST_LOG` wins; otherwise the
/// provided default filter applies.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
