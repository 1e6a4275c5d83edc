use chrono::{Duration, Local, NaiveDate};
use std::fmt::{self, Display, Formatter};

/// The archive publishes with a lag; anything newer than this many days
/// before today is not available yet.
pub const ARCHIVE_LAG_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

impl Display for Boundary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Start => write!(f, "start"),
            Boundary::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateRangeError {
    #[error("{boundary} date `{value}` is not a valid YYYY-MM-DD date")]
    InvalidDateFormat { boundary: Boundary, value: String },
    #[error("{boundary} date {date} is after {latest}, the most recent day the archive serves")]
    DateTooRecent {
        boundary: Boundary,
        date: NaiveDate,
        latest: NaiveDate,
    },
    #[error("end date {end} must be after start date {start}")]
    RangeOrder { start: NaiveDate, end: NaiveDate },
}

/// A validated, inclusive day range with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Validate against the local wall clock.
pub fn validate(start: &str, end: &str) -> Result<DateRange, DateRangeError> {
    validate_at(start, end, Local::now().date_naive())
}

/// Validate against an explicit `today`.
///
/// Checks run in a fixed order: start parses, end parses, start is not too
/// recent, end is not too recent, end is after start.
pub fn validate_at(start: &str, end: &str, today: NaiveDate) -> Result<DateRange, DateRangeError> {
    let start = parse_boundary(Boundary::Start, start)?;
    let end = parse_boundary(Boundary::End, end)?;
    let latest = latest_available(today);

    for (boundary, date) in [(Boundary::Start, start), (Boundary::End, end)] {
        if date > latest {
            return Err(DateRangeError::DateTooRecent { boundary, date, latest });
        }
    }
    if end <= start {
        return Err(DateRangeError::RangeOrder { start, end });
    }
    Ok(DateRange { start, end })
}

/// The most recent day the archive is expected to serve.
pub fn latest_available(today: NaiveDate) -> NaiveDate {
    today - Duration::days(ARCHIVE_LAG_DAYS)
}

fn parse_boundary(boundary: Boundary, raw: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| DateRangeError::InvalidDateFormat {
        boundary,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn accepts_range_up_to_the_lag_boundary() {
        let range = validate_at("2024-03-01", "2024-03-08", today()).expect("valid range");
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(range.end, latest_available(today()));
        assert_eq!(range.days(), 8);
    }

    #[test]
    fn rejects_equal_or_reversed_bounds() {
        assert!(matches!(
            validate_at("2023-01-01", "2023-01-01", today()),
            Err(DateRangeError::RangeOrder { .. })
        ));
        assert!(matches!(
            validate_at("2023-01-05", "2023-01-01", today()),
            Err(DateRangeError::RangeOrder { .. })
        ));
    }

    #[test]
    fn rejects_dates_inside_the_lag() {
        let err = validate_at("2024-03-01", "2024-03-09", today()).unwrap_err();
        assert_eq!(
            err,
            DateRangeError::DateTooRecent {
                boundary: Boundary::End,
                date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
                latest: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            }
        );

        // start is checked before ordering, so a too-recent start wins
        let err = validate_at("2024-03-09", "2024-03-01", today()).unwrap_err();
        assert!(matches!(
            err,
            DateRangeError::DateTooRecent {
                boundary: Boundary::Start,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unparseable_dates() {
        let err = validate_at("2023-13-01", "2023-12-31", today()).unwrap_err();
        assert_eq!(
            err,
            DateRangeError::InvalidDateFormat {
                boundary: Boundary::Start,
                value: "2023-13-01".to_string(),
            }
        );
        assert!(matches!(
            validate_at("2023-01-01", "01/02/2023", today()),
            Err(DateRangeError::InvalidDateFormat {
                boundary: Boundary::End,
                ..
            })
        ));
    }

    #[test]
    fn wall_clock_rejects_today() {
        let now = Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(matches!(
            validate("2020-01-01", &now),
            Err(DateRangeError::DateTooRecent { .. })
        ));
    }
}
