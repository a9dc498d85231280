//! Error types for the tskv I/O core.
//!
//! Structured, per-domain error handling: one `thiserror` variant per failure
//! domain, with `#[from]` for the I/O case since nearly every fallible
//! operation here bottoms out in a `std::io::Error`.

/// Result type alias for tskv I/O core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the reactor, channel pool, and metrics subsystem.
///
/// Programming errors (duplicate fd in the pool, destroying a non-empty pool,
/// ...) are not represented here — see [`crate::invariant`], which logs at
/// critical severity and aborts the process instead of returning a value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O failure (registering a source, polling, accept, recv/send).
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Reactor construction or registration failure.
    #[error("reactor error: {message}")]
    Reactor {
        /// Descriptive error message
        message: String,
    },

    /// Channel pool failure (allocation, lookup).
    #[error("channel pool error: {message}")]
    Pool {
        /// Descriptive error message
        message: String,
    },

    /// Metrics subsystem failure (fold, snapshot).
    #[error("metrics error: {message}")]
    Metrics {
        /// Descriptive error message
        message: String,
    },

    /// A protocol plug-in hook misbehaved in a way the contract does not expect.
    #[error("protocol error: {message}")]
    Protocol {
        /// Descriptive error message
        message: String,
    },

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Descriptive error message
        message: String,
    },
}

impl Error {
    /// Construct a reactor-domain error.
    pub fn reactor<S: Into<String>>(message: S) -> Self {
        Self::Reactor { message: message.into() }
    }

    /// Construct a channel-pool-domain error.
    pub fn pool<S: Into<String>>(message: S) -> Self {
        Self::Pool { message: message.into() }
    }

    /// Construct a metrics-domain error.
    pub fn metrics<S: Into<String>>(message: S) -> Self {
        Self::Metrics { message: message.into() }
    }

    /// Construct a protocol-domain error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Construct a generic error.
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other { message: message.into() }
    }

    /// Error category for metrics and log correlation.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Reactor { .. } => "reactor",
            Self::Pool { .. } => "pool",
            Self::Metrics { .. } => "metrics",
            Self::Protocol { .. } => "protocol",
            Self::Other { .. } => "other",
        }
    }
}
