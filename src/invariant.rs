//! Invariant-violation contract for the I/O core.
//!
//! The design classifies a handful of conditions as programming errors rather
//! than runtime errors: a duplicate fd handed to the channel pool, a pool
//! destroyed with live entries, an unknown fd passed to `release`. These are
//! never propagated as [`crate::error::Error`] values — they are logged at
//! critical severity and the process is terminated, matching the contract
//! the logging collaborator is assumed to provide (spec §4.7).

/// Log a critical message and terminate the process.
///
/// This is the `panic`/fatal-log hybrid the design calls for: `tracing::error!`
/// gives an attributed, structured log line before the process goes down via
/// `std::process::abort`, which (unlike `exit`) preserves the possibility of
/// a core dump for postmortem debugging.
#[track_caller]
pub fn violation(message: &str) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(
        target: "tskv_io::invariant",
        file = location.file(),
        line = location.line(),
        "invariant violation: {message}"
    );
    std::process::abort();
}

/// Assert a condition, escalating to [`violation`] on failure.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::invariant::violation(&format!($($arg)*));
        }
    };
}
