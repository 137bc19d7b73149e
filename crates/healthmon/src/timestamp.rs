//! Millisecond wall-clock timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One hour in milliseconds. Used as the "far future" horizon when work is
/// already outstanding for an entry.
pub const HOUR_MS: u64 = 60 * 60 * 1000;

/// Point in time as milliseconds since the Unix epoch.
///
/// Arithmetic with plain `u64` values is in milliseconds. Subtracting two
/// timestamps saturates at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(u64);

impl TimeStamp {
    /// The zero timestamp, used as "never".
    pub const ZERO: TimeStamp = TimeStamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        TimeStamp(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// True once the timestamp has been stamped with a real time.
    pub const fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Time left from `now` until this timestamp, zero if it already passed.
    pub fn until(self, now: TimeStamp) -> Duration {
        Duration::from_millis(self - now)
    }
}

impl From<SystemTime> for TimeStamp {
    fn from(t: SystemTime) -> Self {
        let ms = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        TimeStamp(ms)
    }
}

impl Add<u64> for TimeStamp {
    type Output = TimeStamp;

    fn add(self, ms: u64) -> TimeStamp {
        TimeStamp(self.0.saturating_add(ms))
    }
}

impl Add<Duration> for TimeStamp {
    type Output = TimeStamp;

    fn add(self, d: Duration) -> TimeStamp {
        self + d.as_millis() as u64
    }
}

impl AddAssign<u64> for TimeStamp {
    fn add_assign(&mut self, ms: u64) {
        *self = *self + ms;
    }
}

impl Sub<u64> for TimeStamp {
    type Output = TimeStamp;

    fn sub(self, ms: u64) -> TimeStamp {
        TimeStamp(self.0.saturating_sub(ms))
    }
}

impl Sub for TimeStamp {
    type Output = u64;

    fn sub(self, other: TimeStamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0 as i64) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => write!(f, "{}ms", self.0),
        }
    }
}
