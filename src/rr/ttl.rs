use std::fmt;
use std::time::Duration;

use chrono::Utc;

/// DNS Time-to-live, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeToLive(u32);

impl Default for TimeToLive {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TimeToLive {
    pub const MAX: TimeToLive = TimeToLive(u32::MAX);
    pub const MIN: TimeToLive = TimeToLive(u32::MIN);
    pub const DEFAULT: TimeToLive = TimeToLive(86400u32);
    pub const ZERO: TimeToLive = TimeToLive(0u32);

    /// Create a TimeToLive from seconds
    pub fn from_secs(secs: u32) -> Self {
        TimeToLive(secs)
    }

    /// Create a TimeToLive from days
    pub fn from_days(days: u32) -> Self {
        TimeToLive(days * 86400)
    }

    /// The raw number of seconds
    pub fn get(&self) -> u32 {
        self.0
    }

    /// The UTC timestamp when a record with this TTL would expire if cached now.
    pub fn deadline(&self) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::from(*self)
    }
}

impl fmt::Display for TimeToLive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TimeToLive {
    fn from(value: u32) -> Self {
        TimeToLive(value)
    }
}

impl From<TimeToLive> for u32 {
    fn from(value: TimeToLive) -> Self {
        value.0
    }
}

impl From<TimeToLive> for i64 {
    fn from(value: TimeToLive) -> Self {
        value.0 as i64
    }
}

impl From<Duration> for TimeToLive {
    fn from(value: Duration) -> Self {
        TimeToLive(
            value
                .as_secs()
                .try_into()
                .expect("Duration does not fit in u32 seconds"),
        )
    }
}

impl From<TimeToLive> for Duration {
    fn from(value: TimeToLive) -> Self {
        Duration::from_secs(value.0 as u64)
    }
}
