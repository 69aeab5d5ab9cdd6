#![forbid(unsafe_code)]

//! Subscriber setup for binaries and tests that want kvcell's log output.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the application. These helpers respect `RUST_LOG` and fall back to
//! `info`. Both are safe to call more than once: later calls are ignored.

use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a compact human-readable subscriber writing to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_compact() -> bool {
    fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .compact()
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Install a JSON subscriber writing one event per line to stdout.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_json() -> bool {
    fmt()
        .with_env_filter(env_filter())
        .json()
        .with_writer(std::io::stdout)
        .try_init()
        .is_ok()
}
