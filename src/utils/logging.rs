//! Structured logging configuration.
//!
//! Thin wrapper over `tracing-subscriber`: honors `RUST_LOG` when present
//! and falls back to the given default filter. Installing twice is a no-op
//! so libraries and binaries can both call it safely.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber logging to stderr.
///
/// `default_filter` is used when `RUST_LOG` is unset, e.g. `"objlink=debug"`.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Install the default subscriber at `info` level.
pub fn init_default() {
    init("info");
}
