//! Clock time handling.
//!
//! All timeline and composition timing is expressed in nanoseconds, with
//! a dedicated `NONE` sentinel for undefined values (an unset seek stop,
//! an unknown duration). Arithmetic propagates `NONE` rather than
//! wrapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point in time or a duration, in nanoseconds.
///
/// `ClockTime::NONE` represents an undefined value and sorts after every
/// defined value, which keeps "no stop bound" at the end of stop-sorted
/// object lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Undefined time.
    pub const NONE: ClockTime = ClockTime(u64::MAX);

    /// Zero.
    pub const ZERO: ClockTime = ClockTime(0);

    /// One second in nanoseconds.
    pub const SECOND: u64 = 1_000_000_000;

    /// One millisecond in nanoseconds.
    pub const MSECOND: u64 = 1_000_000;

    /// Create from raw nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create from whole seconds.
    pub const fn from_seconds(seconds: u64) -> Self {
        Self(seconds * Self::SECOND)
    }

    /// Create from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * Self::MSECOND)
    }

    /// Check whether this is a defined time.
    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Raw nanosecond value. `u64::MAX` for `NONE`.
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Convert to floating-point seconds, `None` if undefined.
    pub fn to_seconds(self) -> Option<f64> {
        if self.is_valid() {
            Some(self.0 as f64 / Self::SECOND as f64)
        } else {
            None
        }
    }

    /// Add, propagating `NONE` and saturating just below it.
    pub fn saturating_add(self, rhs: ClockTime) -> ClockTime {
        if !self.is_valid() || !rhs.is_valid() {
            return ClockTime::NONE;
        }
        ClockTime(self.0.saturating_add(rhs.0).min(u64::MAX - 1))
    }

    /// Subtract, propagating `NONE` and clamping at zero.
    pub fn saturating_sub(self, rhs: ClockTime) -> ClockTime {
        if !self.is_valid() || !rhs.is_valid() {
            return ClockTime::NONE;
        }
        ClockTime(self.0.saturating_sub(rhs.0))
    }

    /// Checked addition: `None` on overflow or if either side is `NONE`.
    pub fn checked_add(self, rhs: ClockTime) -> Option<ClockTime> {
        if !self.is_valid() || !rhs.is_valid() {
            return None;
        }
        let v = self.0.checked_add(rhs.0)?;
        if v == u64::MAX {
            return None;
        }
        Some(ClockTime(v))
    }

    /// The smaller of two times, treating `NONE` as +infinity.
    pub fn min_valid(self, rhs: ClockTime) -> ClockTime {
        match (self.is_valid(), rhs.is_valid()) {
            (true, true) => ClockTime(self.0.min(rhs.0)),
            (true, false) => self,
            (false, true) => rhs,
            (false, false) => ClockTime::NONE,
        }
    }

    /// The larger of two defined times; `NONE` if both are undefined.
    pub fn max_valid(self, rhs: ClockTime) -> ClockTime {
        match (self.is_valid(), rhs.is_valid()) {
            (true, true) => ClockTime(self.0.max(rhs.0)),
            (true, false) => self,
            (false, true) => rhs,
            (false, false) => ClockTime::NONE,
        }
    }
}

impl Default for ClockTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for ClockTime {
    type Output = ClockTime;

    fn add(self, rhs: ClockTime) -> ClockTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign for ClockTime {
    fn add_assign(&mut self, rhs: ClockTime) {
        *self = *self + rhs;
    }
}

impl Sub for ClockTime {
    type Output = ClockTime;

    fn sub(self, rhs: ClockTime) -> ClockTime {
        self.saturating_sub(rhs)
    }
}

impl From<u64> for ClockTime {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "NONE");
        }
        let total_ms = self.0 / Self::MSECOND;
        let hours = total_ms / 3_600_000;
        let mins = (total_ms % 3_600_000) / 60_000;
        let secs = (total_ms % 60_000) / 1000;
        let millis = total_ms % 1000;
        write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
    }
}

/// A half-open time range `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: ClockTime,
    pub stop: ClockTime,
}

impl TimeSpan {
    pub fn new(start: ClockTime, stop: ClockTime) -> Self {
        Self { start, stop }
    }

    /// The span covering nothing.
    pub fn empty() -> Self {
        Self {
            start: ClockTime::ZERO,
            stop: ClockTime::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.stop.is_valid() && !self.start.is_valid() || self.start >= self.stop
    }

    /// Whether `position` lies inside `[start, stop)`.
    pub fn contains(&self, position: ClockTime) -> bool {
        position.is_valid() && position >= self.start && position < self.stop
    }

    /// Whether the two spans share any instant.
    pub fn intersects(&self, other: &TimeSpan) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// The overlapping range, if any.
    pub fn intersection(&self, other: &TimeSpan) -> Option<TimeSpan> {
        let start = self.start.max_valid(other.start);
        let stop = self.stop.min_valid(other.stop);
        if start < stop {
            Some(TimeSpan::new(start, stop))
        } else {
            None
        }
    }
}
