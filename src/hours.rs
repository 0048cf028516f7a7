//! Hour-aligned work units and window enumeration.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::fmt;

/// A single hour of the archive: one remote object, one unit of work.
///
/// Equality and ordering follow the timestamp. Minutes and seconds are
/// discarded at construction, so two timestamps inside the same hour map to
/// the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourUnit {
    date: NaiveDate,
    hour: u32,
}

impl HourUnit {
    /// Create a unit from a timestamp, truncating to the containing hour.
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self {
            date: ts.date_naive(),
            hour: ts.hour(),
        }
    }

    /// Hour of day, 0-23.
    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Calendar date of the unit.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Name of the remote object for this hour.
    ///
    /// The archive pads year, month and day but publishes the hour as a
    /// plain integer, so `2024-01-01-9.json.gz` is correct and
    /// `2024-01-01-09.json.gz` does not exist.
    pub fn object_name(&self) -> String {
        format!(
            "{}-{:02}-{:02}-{}.json.gz",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.hour
        )
    }

    /// File name used for the in-progress download of this unit.
    pub fn scratch_name(&self) -> String {
        format!("{}.part", self.object_name())
    }

    /// The unit one hour later, if representable.
    pub fn next_hour(self) -> Option<HourUnit> {
        if self.hour < 23 {
            Some(HourUnit {
                date: self.date,
                hour: self.hour + 1,
            })
        } else {
            self.date.succ_opt().map(|date| HourUnit { date, hour: 0 })
        }
    }
}

impl fmt::Display for HourUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

/// Lazy iterator over every hour unit in a window, inclusive of both
/// truncated endpoints. Construct with [`hour_range`]; constructing again
/// restarts the sequence.
#[derive(Debug, Clone)]
pub struct HourRange {
    next: Option<HourUnit>,
    last: HourUnit,
}

impl Iterator for HourRange {
    type Item = HourUnit;

    fn next(&mut self) -> Option<HourUnit> {
        let current = self.next?;
        self.next = if current < self.last {
            current.next_hour()
        } else {
            None
        };
        Some(current)
    }
}

/// Enumerate the hour units covering `[start, end]` after truncation.
///
/// An end before the start yields an empty sequence rather than an error;
/// an empty window is a policy outcome, not a fault.
pub fn hour_range(start: DateTime<Utc>, end: DateTime<Utc>) -> HourRange {
    let first = HourUnit::from_datetime(start);
    let last = HourUnit::from_datetime(end);
    HourRange {
        next: if first <= last { Some(first) } else { None },
        last,
    }
}

/// Parse a window endpoint given as `YYYY-MM-DD` (midnight) or
/// `YYYY-MM-DD-HH`.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .context("date has no midnight representation")?;
        return Ok(midnight.and_utc());
    }

    if let Some((date_part, hour_part)) = s.rsplit_once('-') {
        if let (Ok(date), Ok(hour)) = (
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d"),
            hour_part.parse::<u32>(),
        ) {
            if hour < 24 {
                let ts = date
                    .and_hms_opt(hour, 0, 0)
                    .context("hour out of range for date")?;
                return Ok(ts.and_utc());
            }
        }
    }

    anyhow::bail!("Invalid timestamp '{s}': use YYYY-MM-DD or YYYY-MM-DD-HH")
}
