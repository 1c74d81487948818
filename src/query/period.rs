//! Accounting periods and the date ranges a run queries.
//!
//! A run ending on `end` covers the period containing the day before `end`.
//! When that period started less than `lookback` days before `end`, whole
//! earlier periods are added until the lookback window is covered, so a
//! fresh month still reports the tail of the previous one.

use crate::utils::error::QueryError;
use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Period metrics are accumulated over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Month,
    Quarter,
    Year,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Day, Period::Month, Period::Quarter, Period::Year];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| QueryError::UnknownPeriod(s.to_string()))
    }
}

/// Half-open day range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start_ts(&self) -> i64 {
        timestamp(self.start)
    }

    pub fn end_ts(&self) -> i64 {
        timestamp(self.end)
    }
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        QueryError::InvalidDate(format!(
            "should match format YYYY-MM-DD: {}",
            s
        ))
    })
}

/// UTC epoch seconds at midnight of `date`
pub fn timestamp(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// Start of the period containing the day before `date`
pub fn period_start(date: NaiveDate, period: Period) -> NaiveDate {
    let day = date - Days::new(1);
    match period {
        Period::Day => day,
        Period::Month => first_of_month(day),
        Period::Quarter => {
            let mut start = first_of_month(day);
            for _ in 0..(day.month0() % 3) {
                start = first_of_month(start - Days::new(1));
            }
            start
        }
        Period::Year => day - Days::new(u64::from(day.ordinal0())),
    }
}

/// Exclusive end of the period containing the day before `date`
pub fn period_end(date: NaiveDate, period: Period) -> NaiveDate {
    let start = period_start(date, period);
    match period {
        Period::Day => date,
        Period::Month => first_of_month(start + Days::new(32)),
        Period::Quarter => first_of_month(start + Days::new(93)),
        Period::Year => first_of_month(start + Days::new(367)),
    }
}

/// Longest period, in days, that period arithmetic may step over
const PERIOD_SPAN: Days = Days::new(367);

/// Ranges to query for a run ending on `end`, most recent first
///
/// # Errors
/// * `QueryError::OutOfRange` - `end` or the lookback window reaches past
///   the representable dates
pub fn date_ranges(
    end: NaiveDate,
    period: Period,
    lookback_days: i64,
) -> Result<Vec<DateRange>, QueryError> {
    if end.checked_sub_days(PERIOD_SPAN).is_none() || end.checked_add_days(PERIOD_SPAN).is_none() {
        return Err(QueryError::OutOfRange(format!("end date {} is not supported", end)));
    }

    let initial_start = period_start(end, period);
    let lookback = Days::new(lookback_days.max(0) as u64);
    let lookback_min = initial_start
        .checked_sub_days(lookback)
        .filter(|min| min.checked_sub_days(PERIOD_SPAN).is_some())
        .ok_or_else(|| {
            QueryError::OutOfRange(format!(
                "lookback of {} days before {} is not supported",
                lookback_days, initial_start
            ))
        })?;

    let mut ranges = vec![DateRange::new(initial_start, end)];

    // Only backfill while the current period is younger than the lookback
    let backfill = initial_start
        .checked_add_days(lookback)
        .map_or(true, |limit| end < limit);
    if backfill {
        let mut range_end = initial_start;
        while range_end > lookback_min {
            let range_start = period_start(range_end, period);
            ranges.push(DateRange::new(range_start, range_end));
            range_end = range_start;
        }
    }

    Ok(ranges)
}

/// Last day (inclusive) reported for a range ending on `range_end`
pub fn reported_end_date(range_end: NaiveDate, period: Period) -> NaiveDate {
    period_end(range_end, period) - Days::new(1)
}

/// Search timeout grows sublinearly with the days covered
pub fn search_timeout(total_days: i64) -> Duration {
    let days = total_days.max(1) as f64;
    Duration::from_secs((60.0 * days.powf(0.35)) as u64)
}
