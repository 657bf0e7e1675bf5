//! Bar aggregation units and close-time arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A timeframe tag that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timeframe tag: {0}")]
pub struct ParseTimeframeError(pub String);

/// Bar aggregation unit.
///
/// Wire tags are `"D"`, `"W"`, or a decimal integer string interpreted as
/// minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timeframe {
    /// Daily bars.
    Daily,
    /// Weekly bars.
    Weekly,
    /// Intraday bars of the given minute span.
    Minutes(u32),
}

impl Timeframe {
    /// Compute the event time of a bar close for a bar opened at `open`.
    ///
    /// Daily bars close at 23:59:59 on the bar's date; intraday bars close
    /// `n` minutes after the open.
    // TODO: weekly close is the literal open + 7 days rather than the
    // end-of-week boundary; align once downstream consumers can absorb the
    // shifted timestamps.
    #[must_use]
    pub fn close_time(&self, open: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily => end_of_day(open),
            Self::Weekly => end_of_day(open + Duration::days(7)),
            Self::Minutes(minutes) => open + Duration::minutes(i64::from(*minutes)),
        }
    }
}

/// 23:59:59 on the same date as `datetime`.
fn end_of_day(datetime: DateTime<Utc>) -> DateTime<Utc> {
    datetime
        .with_hour(23)
        .and_then(|d| d.with_minute(59))
        .and_then(|d| d.with_second(59))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(datetime)
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "D"),
            Self::Weekly => write!(f, "W"),
            Self::Minutes(minutes) => write!(f, "{minutes}"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "D" => Ok(Self::Daily),
            "W" => Ok(Self::Weekly),
            other => match other.parse::<u32>() {
                Ok(minutes) if minutes > 0 => Ok(Self::Minutes(minutes)),
                _ => Err(ParseTimeframeError(tag.to_string())),
            },
        }
    }
}
