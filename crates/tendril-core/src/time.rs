//! Time-of-day preferences and injectable wall clocks.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ScheduleError, ScheduleResult};

/// Earliest permitted preferred time (inclusive).
pub const DAYLIGHT_START: NaiveTime = match NaiveTime::from_hms_opt(6, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Latest permitted preferred time (inclusive).
pub const DAYLIGHT_END: NaiveTime = match NaiveTime::from_hms_opt(18, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Time of day (UTC, minute precision) at which a care action should happen.
///
/// Parsing only checks syntax. The daylight window is enforced separately by
/// [`PreferredTime::ensure_daylight`] when a schedule is created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PreferredTime(NaiveTime);

impl PreferredTime {
    /// Build a preferred time from hour and minute.
    pub fn from_hm(hour: u32, minute: u32) -> ScheduleResult<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| ScheduleError::validation(format!("invalid time {hour:02}:{minute:02}")))
    }

    /// Parse an `HH:MM` string.
    pub fn parse(s: &str) -> ScheduleResult<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| ScheduleError::validation(format!("preferred time must be HH:MM, got {s:?}")))
    }

    /// The wrapped time of day.
    pub const fn time(&self) -> NaiveTime {
        self.0
    }

    /// Whether this time lies within 06:00–18:00 inclusive.
    pub fn is_daylight(&self) -> bool {
        self.0 >= DAYLIGHT_START && self.0 <= DAYLIGHT_END
    }

    /// Reject times outside the daylight window.
    pub fn ensure_daylight(&self) -> ScheduleResult<()> {
        if self.is_daylight() {
            Ok(())
        } else {
            Err(ScheduleError::validation(format!(
                "preferred time {self} is outside daylight hours (06:00-18:00)"
            )))
        }
    }

    /// This time shifted by the given number of hours, wrapping at midnight.
    pub fn offset_hours(&self, hours: i64) -> NaiveTime {
        let (shifted, _) = self
            .0
            .overflowing_add_signed(ChronoDuration::hours(hours));
        shifted
    }
}

impl fmt::Display for PreferredTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for PreferredTime {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PreferredTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PreferredTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Jump to a specific instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
