//! Structured logging setup.
//!
//! The dispatch core itself only emits `tracing` events; binaries and tests
//! decide how they are rendered.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Human-readable output. `RUST_LOG` overrides the default `info` level.
///
/// Returns `false` if a global subscriber was already installed.
///
/// ```no_run
/// dispatch_core::logging::init();
/// tracing::info!(request_id = 7, "request received");
/// ```
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
        .is_ok()
}

/// JSON lines, for log aggregation.
pub fn init_json() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init()
        .is_ok()
}
