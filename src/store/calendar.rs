//! Calendar math shared by every store backend.
//!
//! All boundaries are computed in UTC. Weeks start on Monday 00:00 UTC
//! (ISO-8601), for both `week` buckets and the `this_week` / `last_week`
//! comparison periods. SQL only filters on the instants produced here, so
//! PostgreSQL and SQLite agree regardless of server locale or session time zone.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Trailing window of a history query. Fixed width, not calendar-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Week,
    Month,
    Year,
}

impl Period {
    pub fn duration(self) -> Duration {
        // ---
        match self {
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
            Period::Year => Duration::days(365),
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(format!("period must be week, month or year, got '{other}'")),
        }
    }
}

/// Bucket width of a history query. Calendar-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    /// Start of the bucket containing `ts`.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        match self {
            Granularity::Hour => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            Granularity::Day => start_of_day(ts),
            Granularity::Week => start_of_week(ts),
        }
    }

    /// Start of the bucket following the one starting at `bucket_start`.
    pub fn next(self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        match self {
            Granularity::Hour => bucket_start + Duration::hours(1),
            Granularity::Day => bucket_start + Duration::days(1),
            Granularity::Week => bucket_start + Duration::weeks(1),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            other => Err(format!("granularity must be hour, day or week, got '{other}'")),
        }
    }
}

/// UTC midnight of the day containing `ts`.
pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(NaiveTime::MIN))
}

/// Monday 00:00 UTC of the week containing `ts`.
pub fn start_of_week(ts: DateTime<Utc>) -> DateTime<Utc> {
    // ---
    let days_from_monday = ts.weekday().num_days_from_monday() as i64;
    start_of_day(ts) - Duration::days(days_from_monday)
}

/// First day of the month containing `ts`, 00:00 UTC.
pub fn start_of_month(ts: DateTime<Utc>) -> DateTime<Utc> {
    // ---
    let first = ts.date_naive().with_day(1).unwrap_or(ts.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

/// Bucket starts covering `[from, to]`, ascending and contiguous.
pub fn bucket_starts(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<DateTime<Utc>> {
    // ---
    let mut starts = Vec::new();
    let mut cursor = granularity.truncate(from);
    while cursor <= to {
        starts.push(cursor);
        cursor = granularity.next(cursor);
    }
    starts
}

/// A named comparison period with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedPeriod {
    pub name: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Inclusive end of a period that stops right before `next_start`.
fn just_before(next_start: DateTime<Utc>) -> DateTime<Utc> {
    next_start - Duration::microseconds(1)
}

/// The six comparison periods as of `now`.
///
/// Current periods run up to `now`; past periods end just before the start
/// of the following one.
pub fn comparison_periods(now: DateTime<Utc>) -> [NamedPeriod; 6] {
    // ---
    let today = start_of_day(now);
    let week = start_of_week(now);
    let month = start_of_month(now);
    let last_month = month
        .checked_sub_months(Months::new(1))
        .unwrap_or(month - Duration::days(30));

    [
        NamedPeriod {
            name: "today",
            start: today,
            end: now,
        },
        NamedPeriod {
            name: "yesterday",
            start: today - Duration::days(1),
            end: just_before(today),
        },
        NamedPeriod {
            name: "this_week",
            start: week,
            end: now,
        },
        NamedPeriod {
            name: "last_week",
            start: week - Duration::weeks(1),
            end: just_before(week),
        },
        NamedPeriod {
            name: "this_month",
            start: month,
            end: now,
        },
        NamedPeriod {
            name: "last_month",
            start: last_month,
            end: just_before(month),
        },
    ]
}
