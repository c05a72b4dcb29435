//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; binaries and tests call
//! [`init_tracing`] once to install a subscriber. The filter comes from
//! `RUST_LOG` and falls back to the supplied default directive.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber, ignoring the error if one is already set
pub fn init_tracing(default_directive: &str) {
    let _ = try_init_tracing(default_directive);
}

/// Install a global fmt subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn try_init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}
