//! Logging initialisation.
//!
//! The engine itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_logging`] with the level from
//! [`LoggingConfig`](crate::config::LoggingConfig).

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: this crate's events at `level`.
pub fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("specan_attrs={level}"))
}

/// Install a fmt subscriber filtered at `level`.
///
/// `RUST_LOG` takes precedence when set. Calling this more than once, or after
/// another subscriber was installed, leaves the existing subscriber in place
/// and returns `false`.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
