//! Logging bring-up for the I/O core.
//!
//! The core only depends on the `tracing` *emit* side — see the module-level
//! docs on [`crate::invariant`] for the fatal-on-violation half of the
//! collaborator contract. This module just wires up a process-wide
//! subscriber so binaries embedding the core (the demo server, tests) get
//! consistent output without each reimplementing it.

use tracing_subscriber::EnvFilter;

/// Install a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Safe to call more than once
/// per process (subsequent calls are no-ops); intended for binaries and
/// integration tests, not for library code embedding this crate.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
