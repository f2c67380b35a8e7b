//! ROS wall-clock time.
//!
//! Stamps on the wire are `{sec, nsec}` pairs measured from the Unix epoch.
//! A zero stamp is meaningful to the action protocol: it marks "no time",
//! e.g. a cancel-all request or a goal that was never stamped.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Stamps compare by their total nanoseconds, so a pair whose `nsec`
/// overflows one second still orders correctly.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

impl Time {
    pub const ZERO: Time = Time { sec: 0, nsec: 0 };

    pub const fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_duration(since_epoch)
    }

    /// Saturates at `u32::MAX` seconds.
    pub fn from_duration(d: Duration) -> Self {
        let sec = u32::try_from(d.as_secs()).unwrap_or(u32::MAX);
        Self {
            sec,
            nsec: d.subsec_nanos(),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.sec as u64, self.nsec)
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    pub fn as_nanos(&self) -> u64 {
        self.sec as u64 * NSEC_PER_SEC + self.nsec as u64
    }
}

impl PartialEq for Time {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl Eq for Time {}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_nanos().cmp(&other.as_nanos())
    }
}

impl Hash for Time {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_nanos().hash(state);
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time::from_duration(self.as_duration().saturating_add(rhs))
    }
}

impl Sub for Time {
    type Output = Duration;

    /// Elapsed time between two stamps, zero if `rhs` is later.
    fn sub(self, rhs: Time) -> Duration {
        self.as_duration().saturating_sub(rhs.as_duration())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}
