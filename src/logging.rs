//! Subscriber setup for binaries embedding the engine.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! host's call.

use tracing_subscriber::EnvFilter;

use crate::config::{EngineConfig, DEFAULT_LOG_FILTER};

/// Install a stderr `fmt` subscriber filtered by `config.log_filter`.
///
/// `RUST_LOG` wins when set. Returns `false` if a global subscriber already
/// exists.
pub fn init(config: &EngineConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
