//! Full-resolution file timestamps.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

/// A modification time with nanosecond resolution.
///
/// Ordering compares seconds first, then nanoseconds. Two files rewritten
/// within the same second still compare unequal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// The Unix epoch. Also used for "file absent".
    pub const ZERO: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Create a timestamp from seconds and nanoseconds since the epoch.
    ///
    /// Nanoseconds at or above one second carry into `secs`.
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs + i64::from(nanos / 1_000_000_000),
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Build from the raw `st_mtime` / `st_mtime_nsec` pair of a stat buffer.
    pub fn from_stat(secs: i64, nsec: i64) -> Self {
        Self::new(secs, nsec.clamp(0, 999_999_999) as u32)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Convert to a `SystemTime`. Pre-epoch values saturate to the epoch.
    pub fn to_system_time(&self) -> SystemTime {
        if self.secs < 0 {
            return UNIX_EPOCH;
        }
        UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                if d.subsec_nanos() == 0 {
                    Self::new(-(d.as_secs() as i64), 0)
                } else {
                    Self::new(-(d.as_secs() as i64) - 1, 1_000_000_000 - d.subsec_nanos())
                }
            }
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.secs, self.nanos) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            None => write!(f, "{}.{:09}", self.secs, self.nanos),
        }
    }
}
