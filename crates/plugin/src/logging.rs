//! Logging setup
//!
//! Formatted `tracing` output on stdout, which is the attached console.
//! `RUST_LOG` overrides the level chosen by the config.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber; later calls are no-ops
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .try_init();
}

/// Route panics through tracing so they reach the console
pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("{}", info);
    }));
}
