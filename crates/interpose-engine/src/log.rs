//! Process-wide lifecycle logging toggle
//!
//! Lifecycle events (context creation/teardown, shadow type creation/teardown,
//! tampering) are emitted through `tracing` only while the toggle is on.
//! The toggle is off by default.

use std::sync::atomic::{AtomicBool, Ordering};

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Turn lifecycle logging on or off for the whole process
pub fn set_logging_enabled(enabled: bool) {
    LOGGING_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether lifecycle logging is currently on
#[inline]
pub fn logging_enabled() -> bool {
    LOGGING_ENABLED.load(Ordering::Relaxed)
}

/// Emit a lifecycle event at debug level when logging is enabled
macro_rules! log_event {
    ($($arg:tt)+) => {
        if $crate::log::logging_enabled() {
            tracing::debug!($($arg)+);
        }
    };
}

/// Emit a warning when logging is enabled
macro_rules! log_warning {
    ($($arg:tt)+) => {
        if $crate::log::logging_enabled() {
            tracing::warn!($($arg)+);
        }
    };
}
