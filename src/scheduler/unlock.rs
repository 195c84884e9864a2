// Unlock-time arithmetic
//
// An unlock time is a time of day in a fixed UTC offset. Distances are taken
// on the 24h circle so that a target at 00:00:00.000 is 100ms away from both
// 23:59:59.900 and 00:00:00.100.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const DAY_MS: i64 = 86_400_000;

/// Daily time of day at which a task becomes eligible for submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnlockTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl UnlockTime {
    pub fn new(hour: u32, minute: u32, second: u32, millisecond: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 || millisecond > 999 {
            return None;
        }
        Some(Self {
            hour,
            minute,
            second,
            millisecond,
        })
    }

    pub fn millis_of_day(&self) -> i64 {
        ((self.hour as i64 * 60 + self.minute as i64) * 60 + self.second as i64) * 1000
            + self.millisecond as i64
    }

    /// Signed distance in ms from `now` to the nearest occurrence,
    /// normalised into (-12h, +12h]. Positive means the unlock is ahead.
    pub fn offset_from(&self, now: DateTime<Utc>, zone: FixedOffset) -> i64 {
        let mut delta = (self.millis_of_day() - local_millis_of_day(now, zone)).rem_euclid(DAY_MS);
        if delta > DAY_MS / 2 {
            delta -= DAY_MS;
        }
        delta
    }

    /// True iff `now` lies within `tolerance_ms` of an occurrence
    pub fn within_window(&self, now: DateTime<Utc>, zone: FixedOffset, tolerance_ms: u64) -> bool {
        self.offset_from(now, zone).abs() <= tolerance_ms as i64
    }

    /// The occurrence closest to `now`, past or future
    pub fn nearest_occurrence(&self, now: DateTime<Utc>, zone: FixedOffset) -> DateTime<Utc> {
        truncate_to_millis(now) + Duration::milliseconds(self.offset_from(now, zone))
    }

    /// First occurrence strictly after `after`
    pub fn next_occurrence(&self, after: DateTime<Utc>, zone: FixedOffset) -> DateTime<Utc> {
        let mut delta =
            (self.millis_of_day() - local_millis_of_day(after, zone)).rem_euclid(DAY_MS);
        if delta == 0 {
            delta = DAY_MS;
        }
        truncate_to_millis(after) + Duration::milliseconds(delta)
    }
}

fn local_millis_of_day(now: DateTime<Utc>, zone: FixedOffset) -> i64 {
    let local = now.with_timezone(&zone);
    // leap seconds report nanosecond >= 1e9
    let millis = (local.nanosecond() / 1_000_000).min(999);
    local.num_seconds_from_midnight() as i64 * 1000 + millis as i64
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at - Duration::nanoseconds((at.timestamp_subsec_nanos() % 1_000_000) as i64)
}

impl fmt::Display for UnlockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            self.hour, self.minute, self.second, self.millisecond
        )
    }
}

impl FromStr for UnlockTime {
    type Err = String;

    /// Accepts `HH:MM:SS` or `HH:MM:SS.mmm`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid unlock time '{}', expected HH:MM:SS[.mmm]", s);

        let (clock, fraction) = match s.split_once('.') {
            Some((clock, fraction)) => (clock, Some(fraction)),
            None => (s, None),
        };

        let parts: Vec<&str> = clock.split(':').collect();
        let two_digits = |p: &&str| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit());
        if parts.len() != 3 || !parts.iter().all(two_digits) {
            return Err(invalid());
        }
        let hour: u32 = parts[0].parse().map_err(|_| invalid())?;
        let minute: u32 = parts[1].parse().map_err(|_| invalid())?;
        let second: u32 = parts[2].parse().map_err(|_| invalid())?;

        let millisecond: u32 = match fraction {
            Some(fraction) if fraction.len() == 3 && fraction.chars().all(|c| c.is_ascii_digit()) => {
                fraction.parse().map_err(|_| invalid())?
            }
            Some(_) => return Err(invalid()),
            None => 0,
        };

        UnlockTime::new(hour, minute, second, millisecond).ok_or_else(invalid)
    }
}

impl Serialize for UnlockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UnlockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Fires at most once per occurrence of an unlock time
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    unlock: UnlockTime,
    zone: FixedOffset,
    tolerance_ms: u64,
    fired_for: Option<DateTime<Utc>>,
}

impl DailyTrigger {
    pub fn new(unlock: UnlockTime, zone: FixedOffset, tolerance_ms: u64) -> Self {
        Self {
            unlock,
            zone,
            tolerance_ms,
            fired_for: None,
        }
    }

    /// True the first time `now` falls in the window of an occurrence
    pub fn should_fire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.unlock.within_window(now, self.zone, self.tolerance_ms) {
            return false;
        }
        let occurrence = self.unlock.nearest_occurrence(now, self.zone);
        self.fire_at(occurrence)
    }

    /// Marks `occurrence` as fired; false if it already was
    pub fn fire_at(&mut self, occurrence: DateTime<Utc>) -> bool {
        if self.fired_for == Some(occurrence) {
            return false;
        }
        self.fired_for = Some(occurrence);
        true
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.fired_for
    }
}
