//! Tracing subscriber setup shared by host and plugin processes.

use tracing_subscriber::EnvFilter;

/// Initialize structured logging with tracing-subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to `info`.
/// Safe to call from both the host binary and a crawler subprocess;
/// plugin processes log to stderr so stdout stays reserved for the
/// handshake line.
pub fn init() {
    init_with_level("info");
}

/// Initialize with an explicit fallback level.
pub fn init_with_level(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
