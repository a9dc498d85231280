//! Reactor configuration.
//!
//! CLI argument parsing, `--help`/`--version` banners, and config validation
//! as a feature are explicitly out of scope for this core (spec §1) — those
//! belong to the outer binary. What remains is the plain set of knobs the
//! reactor, channel, and pool need at construction time.

use std::time::Duration;

/// Construction-time knobs for [`crate::reactor::Reactor`] and the types it owns.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Capacity in bytes of each channel's RX buffer.
    pub rx_buffer_capacity: usize,
    /// Capacity in bytes of each channel's TX buffer.
    pub tx_buffer_capacity: usize,
    /// Number of channel slots per pool chunk.
    pub pool_chunk_size: usize,
    /// Maximum number of readiness events drained per `poll` call.
    pub max_events_per_poll: usize,
    /// Upper bound on how long a single readiness wait blocks for.
    pub poll_timeout: Duration,
    /// Minimum interval between a given thread's metrics folds (spec §4.3).
    pub metrics_fold_interval: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            rx_buffer_capacity: 4096,
            tx_buffer_capacity: 4096,
            pool_chunk_size: 256,
            max_events_per_poll: 1024,
            poll_timeout: Duration::from_millis(500),
            metrics_fold_interval: Duration::from_millis(100),
        }
    }
}
