//! Instrument identity and market-hours helpers.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Instrument construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    /// Symbol is empty.
    #[error("instrument symbol must be non-empty")]
    EmptySymbol,
    /// Minimum tick is zero or negative.
    #[error("minimum tick must be positive, got {0}")]
    NonPositiveMinTick(Decimal),
    /// Lot size is zero.
    #[error("lot size must be positive")]
    ZeroLotSize,
}

/// Wall-clock time of day in the exchange's local zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    /// Hour, 0-23.
    pub hour: u32,
    /// Minute, 0-59.
    pub minute: u32,
    /// Second, 0-59.
    pub second: u32,
}

impl TimeOfDay {
    /// Create a new time of day.
    #[must_use]
    pub const fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Returns true if this time of day falls strictly before the clock time
    /// of `datetime`.
    #[must_use]
    pub fn is_before(&self, datetime: DateTime<Utc>) -> bool {
        (self.hour, self.minute, self.second)
            < (datetime.hour(), datetime.minute(), datetime.second())
    }

    /// Returns true if `datetime` falls in the same hour and minute.
    #[must_use]
    pub fn matches_minute(&self, datetime: DateTime<Utc>) -> bool {
        self.hour == datetime.hour() && self.minute == datetime.minute()
    }
}

/// Trading venue with its regular session boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Venue name, e.g. `NYSE`.
    pub name: String,
    /// Regular session open.
    pub market_open: TimeOfDay,
    /// Regular session close.
    pub market_close: TimeOfDay,
}

impl Exchange {
    /// Create a new exchange.
    #[must_use]
    pub fn new(name: &str, market_open: TimeOfDay, market_close: TimeOfDay) -> Self {
        Self {
            name: name.to_string(),
            market_open,
            market_close,
        }
    }
}

/// A tradable security. Immutable after construction; shared as
/// `Arc<Instrument>` across orders, trades and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Ticker symbol.
    pub symbol: String,
    /// Venue the instrument trades on.
    pub exchange: Exchange,
    /// Minimum price increment.
    pub min_tick: Decimal,
    /// Number of units per lot.
    pub lot_size: u64,
}

impl Instrument {
    /// Create a new instrument.
    ///
    /// # Errors
    ///
    /// Returns an [`InstrumentError`] when the symbol is empty, the minimum
    /// tick is not positive, or the lot size is zero.
    pub fn new(
        symbol: &str,
        exchange: Exchange,
        min_tick: Decimal,
        lot_size: u64,
    ) -> Result<Self, InstrumentError> {
        if symbol.is_empty() {
            return Err(InstrumentError::EmptySymbol);
        }
        if min_tick <= Decimal::ZERO {
            return Err(InstrumentError::NonPositiveMinTick(min_tick));
        }
        if lot_size == 0 {
            return Err(InstrumentError::ZeroLotSize);
        }

        Ok(Self {
            symbol: symbol.to_string(),
            exchange,
            min_tick,
            lot_size,
        })
    }
}
