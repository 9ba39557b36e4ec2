//! Creation/modification date filtering.
//!
//! Periods are half-open `[start, end)` instant intervals. A bound of `None`
//! is open. Date strings are resolved in an explicit UTC offset or, when
//! none is given, the local timezone.

use std::fmt;

use chrono::{
    DateTime, Days, FixedOffset, Local, Months, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use thiserror::Error;

use crate::record::Record;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("'{0}' is not a date (expected YYYY, YYYY-MM, YYYY-MM-DD or YYYY-MM-DD HH:MM[:SS])")]
    Invalid(String),
    #[error("'{value}' is too {detail} for --*-{policy}")]
    Precision {
        value: String,
        policy: Policy,
        detail: &'static str,
    },
    #[error("'{0}' is not a UTC offset (expected Z, UTC or +HH:MM)")]
    Offset(String),
    #[error("'{0}' does not exist in the local timezone")]
    NonexistentLocalTime(String),
}

/// How a date string becomes a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// The whole year or month named.
    In,
    /// The whole day named.
    On,
    /// Everything before the named unit starts.
    Before,
    /// Everything after the named unit ends.
    After,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "in",
            Self::On => "on",
            Self::Before => "before",
            Self::After => "after",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    Year,
    Month,
    Day,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePeriod {
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
}

impl TimePeriod {
    /// Parse `value` under `policy`, resolving wall-clock times in `offset`
    /// (or the local timezone when `None`).
    pub fn parse(
        value: &str,
        policy: Policy,
        offset: Option<FixedOffset>,
    ) -> Result<Self, PeriodError> {
        let value = value.trim();

        // An RFC 3339 string carries its own offset
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Self::from_unit(value, policy, Precision::Instant, dt, dt);
        }

        let (naive, precision) = parse_naive(value)?;
        let next = match precision {
            Precision::Year => naive.checked_add_months(Months::new(12)),
            Precision::Month => naive.checked_add_months(Months::new(1)),
            Precision::Day => naive.checked_add_days(Days::new(1)),
            Precision::Instant => Some(naive),
        }
        .ok_or_else(|| PeriodError::Invalid(value.to_string()))?;

        let start = resolve(value, naive, offset)?;
        let end = resolve(value, next, offset)?;
        Self::from_unit(value, policy, precision, start, end)
    }

    fn from_unit(
        value: &str,
        policy: Policy,
        precision: Precision,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Self, PeriodError> {
        let precision_error = |detail| PeriodError::Precision {
            value: value.to_string(),
            policy,
            detail,
        };

        let period = match policy {
            Policy::In => {
                if precision == Precision::Instant {
                    return Err(precision_error("precise"));
                }
                Self {
                    start: Some(start),
                    end: Some(end),
                }
            }
            Policy::On => match precision {
                Precision::Year | Precision::Month => return Err(precision_error("broad")),
                Precision::Day => Self {
                    start: Some(start),
                    end: Some(end),
                },
                Precision::Instant => {
                    let day = start.date_naive();
                    let midnight = day.and_hms_opt(0, 0, 0).unwrap_or_default();
                    let offset = *start.offset();
                    let day_start = offset
                        .from_local_datetime(&midnight)
                        .single()
                        .ok_or_else(|| PeriodError::Invalid(value.to_string()))?;
                    Self {
                        start: Some(day_start),
                        end: day_start.checked_add_days(Days::new(1)),
                    }
                }
            },
            Policy::Before => Self {
                start: None,
                end: Some(start),
            },
            Policy::After => Self {
                start: Some(end),
                end: None,
            },
        };
        Ok(period)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| instant >= s) && self.end.is_none_or(|e| instant < e)
    }
}

fn parse_naive(value: &str) -> Result<(NaiveDateTime, Precision), PeriodError> {
    let invalid = || PeriodError::Invalid(value.to_string());

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok((dt, Precision::Instant));
        }
    }

    let (date, precision) = if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        (d, Precision::Day)
    } else if let Ok(d) = NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d") {
        (d, Precision::Month)
    } else if value.len() == 4 && value.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = value.parse().map_err(|_| invalid())?;
        (NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?, Precision::Year)
    } else {
        return Err(invalid());
    };

    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    Ok((midnight, precision))
}

fn resolve(
    value: &str,
    naive: NaiveDateTime,
    offset: Option<FixedOffset>,
) -> Result<DateTime<FixedOffset>, PeriodError> {
    let resolved = match offset {
        Some(offset) => offset.from_local_datetime(&naive).single(),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset()),
    };
    resolved.ok_or_else(|| PeriodError::NonexistentLocalTime(value.to_string()))
}

/// Parse `Z`, `UTC` or a `+HH:MM` / `-HHMM` offset.
pub fn parse_offset(value: &str) -> Result<FixedOffset, PeriodError> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("z") || v.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| PeriodError::Offset(value.to_string()));
    }

    let err = || PeriodError::Offset(value.to_string());
    let (sign, rest) = match v.as_bytes().first() {
        Some(b'+') => (1, &v[1..]),
        Some(b'-') => (-1, &v[1..]),
        _ => return Err(err()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(err());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| err())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| err())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

/// Requested periods per timestamp axis. Every period on every axis must
/// contain the record's timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub created: Vec<TimePeriod>,
    pub modified: Vec<TimePeriod>,
}

impl DateFilter {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        axis_matches(&self.created, record.created)
            && axis_matches(&self.modified, record.modified)
    }
}

fn axis_matches(periods: &[TimePeriod], timestamp: Option<DateTime<Utc>>) -> bool {
    if periods.is_empty() {
        return true;
    }
    match timestamp {
        Some(t) => periods.iter().all(|p| p.contains(t)),
        None => false,
    }
}

/// Keep records inside every requested period. No periods is identity.
pub fn filter_by_date(records: Vec<Record>, filter: &DateFilter) -> Vec<Record> {
    if filter.is_empty() {
        return records;
    }
    let before = records.len();
    let matched: Vec<Record> = records.into_iter().filter(|r| filter.matches(r)).collect();
    log::info!("Filtered {} songs by date", before - matched.len());
    matched
}
