//! Microgrid digital twin: actors exchanging energy over a topic bus,
//! balanced by a forecast-driven planner with a contract-net fallback.

#[cfg(feature = "api")]
pub mod api;
/// Topic bus, envelopes and the message codec.
pub mod bus;
/// Contract-net negotiation.
pub mod cnp;
pub mod config;
pub mod devices;
pub mod error;
pub mod forecast;
pub mod io;
pub mod linalg;
pub mod planning;
pub mod runner;
/// Tick source, actors, aggregator and per-run bookkeeping.
pub mod sim;

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber, honouring `RUST_LOG` (default `info`).
///
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
