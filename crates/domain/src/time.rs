//! Time and timestamp helpers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ScheduleError;

/// UTC timestamp used for rule-queue entries and timer deadlines.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// A wall-clock time of day (`HH:MM`, 24-hour).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    /// Construct from hour/minute, checking bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidTimestamp`] when out of range.
    pub fn new(hour: u8, minute: u8) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTimestamp(format!(
                "{hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// The next occurrence of this time of day strictly after `after`.
    ///
    /// Schedule entries for the remainder of the day resolve to today;
    /// entries already past wrap to tomorrow (midnight wrap).
    #[must_use]
    pub fn next_occurrence(self, after: Timestamp) -> Timestamp {
        // Fields are bounds-checked at construction, so this never falls
        // back in practice.
        let candidate = after
            .date_naive()
            .and_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .map_or(after, |dt| Utc.from_utc_datetime(&dt));
        if candidate > after {
            candidate
        } else {
            candidate + Duration::days(1)
        }
    }

    /// The most recent occurrence of this time of day at or before `at`.
    #[must_use]
    pub fn previous_occurrence(self, at: Timestamp) -> Timestamp {
        let next = self.next_occurrence(at);
        next - Duration::days(1)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTimestamp(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Extract the time of day from a timestamp.
#[must_use]
pub fn time_of_day(ts: Timestamp) -> TimeOfDay {
    TimeOfDay {
        hour: u8::try_from(ts.hour()).unwrap_or(0),
        minute: u8::try_from(ts.minute()).unwrap_or(0),
    }
}
