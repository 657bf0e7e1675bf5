//! OHLCV candle container, structural validation and session-boundary
//! detection.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Timeframe;
use crate::models::Exchange;

/// Earliest plausible year for market data timestamps; anything older is a
/// feed artifact.
const MIN_PLAUSIBLE_YEAR: i32 = 1995;

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open price.
    pub open: Decimal,
    /// Bar high price.
    pub high: Decimal,
    /// Bar low price.
    pub low: Decimal,
    /// Bar close price.
    pub close: Decimal,
    /// Traded volume over the bar.
    pub volume: u64,
    /// Bar open timestamp.
    pub datetime: DateTime<Utc>,
}

impl Candle {
    /// Create a new candle.
    #[must_use]
    pub const fn new(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
        datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            datetime,
        }
    }

    /// Structural sanity: a plausible timestamp and open/close inside the
    /// low..=high range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.datetime.year() < MIN_PLAUSIBLE_YEAR {
            return false;
        }
        if self.high < self.low {
            return false;
        }
        self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
    }

    /// Returns true if this bar opens the exchange's regular session.
    #[must_use]
    pub fn is_opening(&self, exchange: &Exchange) -> bool {
        exchange.market_open.matches_minute(self.datetime)
    }

    /// Returns true if this bar is the last one of the session for the given
    /// timeframe. Daily and weekly bars always close their session.
    #[must_use]
    pub fn is_closing_for_timeframe(&self, timeframe: Timeframe, exchange: &Exchange) -> bool {
        match timeframe {
            Timeframe::Daily | Timeframe::Weekly => true,
            Timeframe::Minutes(_) => {
                let bar_close = timeframe.close_time(self.datetime);
                exchange.market_close.matches_minute(bar_close)
            }
        }
    }
}
