//! Tracing bootstrap.
//!
//! Library code only emits `tracing` events; binaries embedding the
//! runtime call [`init`] once to install a subscriber. Filtering follows
//! `RUST_LOG` (e.g. `RUST_LOG=agentloom=debug`).

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the default subscriber: env-filtered fmt layer plus span-trace
/// capture for diagnostics. Safe to call once per process; subsequent
/// calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
