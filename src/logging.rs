//! Logging initialization
//!
//! Thin wrapper around tracing-subscriber so the front-end and tests set
//! up the same pipeline. `RUST_LOG` wins over the passed default.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber with `default_filter` (e.g. "info" or
/// "ethpool_client=debug"). Safe to call more than once; later calls are
/// no-ops.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("info");
        init_logging("debug");
        tracing::debug!("logging initialized twice without panicking");
    }
}
