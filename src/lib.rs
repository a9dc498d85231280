//! tskv non-blocking TCP I/O core.
//!
//! An edge-triggered readiness reactor, a pool of per-connection state
//! machines with bounded receive/transmit buffers, a protocol plug-in
//! interface, and the sharded metrics subsystem the hot path uses to report
//! without contending on a lock per byte.
//!
//! This crate is deliberately narrow: no storage engine, no TLS, no
//! multi-reactor sharding, no CLI. It is the I/O core a single-node
//! time-series key-value server builds its network surface on top of.
//!
//! ```no_run
//! use tskv_io::config::ReactorConfig;
//! use tskv_io::protocol::Echo;
//! use tskv_io::reactor::Reactor;
//!
//! # fn main() -> tskv_io::error::Result<()> {
//! let mut reactor = Reactor::<Echo>::new(ReactorConfig::default())?;
//! // `listener_fd` is a bound, listening, non-blocking socket the caller owns.
//! # let listener_fd = -1;
//! reactor.add_listener(listener_fd)?;
//! reactor.run()
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod invariant;
pub mod keyed;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod reactor;

pub use channel::{Channel, ChannelState};
pub use config::ReactorConfig;
pub use error::{Error, Result};
pub use pool::ChannelPool;
pub use reactor::{Reactor, ShutdownHandle};
