//! Timing primitives for cue playback.
//!
//! All cue timing is expressed as [`ClockTime`]: signed nanoseconds. Signed
//! because an action time below zero means "runs until stopped", and because
//! differences between two clock readings are taken all over the state machine.
//!
//! - [`Clock`] - Monotonic clock shared by a cue list and its scheduler

use std::time::{Duration, Instant};

/// A point in time or a duration, in nanoseconds.
pub type ClockTime = i64;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: ClockTime = 1_000_000_000;

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: ClockTime = 1_000_000;

/// Convert floating-point seconds to clock time.
#[inline]
pub fn seconds(value: f64) -> ClockTime {
    if value.is_infinite() && value.is_sign_negative() {
        return -1;
    }
    (value * NANOS_PER_SEC as f64).round() as ClockTime
}

/// Convert milliseconds to clock time.
#[inline]
pub fn millis(value: i64) -> ClockTime {
    value.saturating_mul(NANOS_PER_MILLI)
}

/// Convert clock time to floating-point seconds.
#[inline]
pub fn to_seconds(value: ClockTime) -> f64 {
    value as f64 / NANOS_PER_SEC as f64
}

/// Convert a std duration to clock time, saturating at `i64::MAX`.
#[inline]
pub fn from_duration(value: Duration) -> ClockTime {
    ClockTime::try_from(value.as_nanos()).unwrap_or(ClockTime::MAX)
}

/// Format clock time as `m:ss.mmm` (used for cue list fields).
pub fn format_time(value: ClockTime) -> String {
    if value < 0 {
        return "∞".to_string();
    }
    let total_millis = value / NANOS_PER_MILLI;
    let minutes = total_millis / 60_000;
    let secs = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;
    format!("{}:{:02}.{:03}", minutes, secs, millis)
}

/// Monotonic clock measuring nanoseconds since its creation.
///
/// One clock is owned by each cue list so that every pulse, play and pause
/// issued against the list reads the same timeline.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Create a clock whose zero is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current time on this clock.
    #[inline]
    pub fn now(&self) -> ClockTime {
        from_duration(self.origin.elapsed())
    }
}
