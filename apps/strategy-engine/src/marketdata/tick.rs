//! Last-trade tick container.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Earliest plausible year for market data timestamps.
const MIN_PLAUSIBLE_YEAR: i32 = 1995;

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Trade timestamp.
    pub datetime: DateTime<Utc>,
    /// Last traded price.
    pub last_price: Decimal,
    /// Last traded size.
    pub last_size: u64,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub const fn new(datetime: DateTime<Utc>, last_price: Decimal, last_size: u64) -> Self {
        Self {
            datetime,
            last_price,
            last_size,
        }
    }

    /// Structural sanity: a plausible timestamp and a positive price.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.datetime.year() >= MIN_PLAUSIBLE_YEAR && self.last_price > Decimal::ZERO
    }
}
