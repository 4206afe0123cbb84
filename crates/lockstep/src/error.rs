// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by lockstep operations.

/// Errors surfaced by timers, the coordinator, the RTT tool and the bus.
///
/// # Example
///
/// ```rust,no_run
/// use lockstep::{timer, Error};
/// # use lockstep::bus::Bus;
/// # use lockstep::timer::TimerConfig;
/// # let bus = Bus::builder("hlc").build().unwrap();
/// let config = TimerConfig::new("hlc_1", 100_000_000).offset_ns(200_000_000);
///
/// match timer::create(&bus, config) {
///     Err(Error::InvalidOffset { offset_ns, period_ns }) => {
///         eprintln!("offset {} must stay below period {}", offset_ns, period_ns)
///     }
///     Err(e) => eprintln!("other error: {}", e),
///     Ok(_) => {}
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors (fatal at construction, no partial object)
    // ========================================================================
    /// Timer period must be strictly positive.
    InvalidPeriod,
    /// Real-time timers require `offset_ns < period_ns`.
    InvalidOffset {
        /// Offending offset.
        offset_ns: u64,
        /// Configured period.
        period_ns: u64,
    },
    /// Simulated time was requested but the configuration forbids it.
    SimulatedTimeNotAllowed,
    /// Coordinator requires at least one vehicle id.
    NoVehicles,
    /// RTT activation requires a nonempty program id.
    EmptyProgramId,

    // ========================================================================
    // Misuse errors (recoverable, prior state is kept)
    // ========================================================================
    /// A timer instance can be started at most once per lifetime.
    AlreadyStarted,

    // ========================================================================
    // Runtime errors
    // ========================================================================
    /// Two endpoints requested the same topic with different payload types.
    TypeMismatch {
        /// Topic the mismatch occurred on.
        topic: String,
    },
    /// A user-supplied callback panicked; the coordinator exited via `on_stop`.
    CallbackPanicked,
    /// Bus-level failure (publish/subscribe plumbing).
    Bus(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidPeriod => write!(f, "Timer period must be greater than zero"),
            Error::InvalidOffset {
                offset_ns,
                period_ns,
            } => write!(
                f,
                "Timer offset {} ns must be smaller than period {} ns",
                offset_ns, period_ns
            ),
            Error::SimulatedTimeNotAllowed => {
                write!(f, "Simulated time requested but not allowed")
            }
            Error::NoVehicles => write!(f, "Coordinator needs a nonempty vehicle id list"),
            Error::EmptyProgramId => write!(f, "RTT program id must not be empty"),
            Error::AlreadyStarted => write!(f, "The timer can not be started twice"),
            Error::TypeMismatch { topic } => {
                write!(f, "Topic '{}' already registered with another type", topic)
            }
            Error::CallbackPanicked => write!(f, "A user callback panicked"),
            Error::Bus(msg) => write!(f, "Bus error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for results using the crate's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_values() {
        let e = Error::InvalidOffset {
            offset_ns: 7,
            period_ns: 5,
        };
        let text = e.to_string();
        assert!(text.contains('7'));
        assert!(text.contains('5'));
    }

    #[test]
    fn errors_are_std_errors() {
        fn takes_std_error(_: &dyn std::error::Error) {}
        takes_std_error(&Error::AlreadyStarted);
    }
}
