//! Logging macros for the allocation engine with verbosity level control.
//!
//! Messages are forwarded to the `log` facade, so the host decides where they
//! go. Nothing is formatted when the verbosity gate is closed.
//! Verbosity levels:
//! - 0: SILENT (only warnings and errors)
//! - 1: CHANGES (allocations, releases, episode boundaries)
//! - 2: CHECKS (strategy choices, no-capacity outcomes)
//! - 3: DEBUG (policy updates, per-vehicle simulation internals)

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: allocations, releases, simulation summaries.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            ::log::info!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: strategy decisions, rejected vehicles.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            ::log::debug!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
///
/// Used for: Q-value updates and other learning internals.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            ::log::trace!($($arg)*);
        }
    };
}
