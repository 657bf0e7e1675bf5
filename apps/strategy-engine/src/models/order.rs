//! Order entity and its lifecycle state machine.
//!
//! An [`Order`] is owned by exactly one [`Trade`](super::Trade) at any
//! instant and is mutated only through the lifecycle methods here, which
//! enforce the transition rules: `New -> Confirmed -> PartialFilled ->
//! Filled`, with `Cancelled` reachable from `Confirmed`/`PartialFilled` and
//! `Rejected` reachable from `New`. `Filled` and `Rejected` are terminal.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Instrument;
use crate::error::EngineError;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Compact wire tag used inside order ids.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Buy => "B",
            Self::Sell => "S",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for OrderSide {
    type Err = EngineError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "B" => Ok(Self::Buy),
            "S" => Ok(Self::Sell),
            other => Err(EngineError::UnknownOrderSide {
                caller: "OrderSide::from_str",
                order_id: String::new(),
                message: other.to_string(),
            }),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at the limit price or better.
    Limit,
    /// Execute at the best available price.
    Market,
    /// Becomes a market order once the stop price trades.
    Stop,
    /// Limit order for the opening auction.
    LimitOnOpen,
    /// Limit order for the closing auction.
    LimitOnClose,
    /// Market order for the opening auction.
    MarketOnOpen,
    /// Market order for the closing auction.
    MarketOnClose,
}

impl OrderType {
    /// Compact wire tag used inside order ids.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Limit => "LMT",
            Self::Market => "MKT",
            Self::Stop => "STP",
            Self::LimitOnOpen => "LOO",
            Self::LimitOnClose => "LOC",
            Self::MarketOnOpen => "MOO",
            Self::MarketOnClose => "MOC",
        }
    }

    /// Returns true for the order types that carry a price.
    #[must_use]
    pub const fn is_priced(&self) -> bool {
        matches!(
            self,
            Self::Limit | Self::Stop | Self::LimitOnOpen | Self::LimitOnClose
        )
    }

    /// Returns true for the four opening/closing auction types.
    #[must_use]
    pub const fn is_auction(&self) -> bool {
        matches!(
            self,
            Self::LimitOnOpen | Self::LimitOnClose | Self::MarketOnOpen | Self::MarketOnClose
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for OrderType {
    type Err = EngineError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "LMT" => Ok(Self::Limit),
            "MKT" => Ok(Self::Market),
            "STP" => Ok(Self::Stop),
            "LOO" => Ok(Self::LimitOnOpen),
            "LOC" => Ok(Self::LimitOnClose),
            "MOO" => Ok(Self::MarketOnOpen),
            "MOC" => Ok(Self::MarketOnClose),
            other => Err(EngineError::UnknownOrderType {
                caller: "OrderType::from_str",
                order_id: String::new(),
                message: other.to_string(),
            }),
        }
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Valid for the current trading day.
    Day,
    /// Good until cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Valid for the opening/closing auction only.
    Auction,
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Created but not yet acknowledged by the broker.
    New,
    /// Acknowledged by the broker, working.
    Confirmed,
    /// Some, but not all, quantity executed.
    PartialFilled,
    /// Fully executed. Terminal.
    Filled,
    /// Cancelled after confirmation. Terminal.
    Cancelled,
    /// Rejected before confirmation. Terminal.
    Rejected,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Confirmed => "Confirmed",
            Self::PartialFilled => "PartialFilled",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// A single buy/sell intent with execution tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: String,
    instrument: Arc<Instrument>,
    side: OrderSide,
    order_type: OrderType,
    tif: TimeInForce,
    destination: String,
    qty: u64,
    price: Option<Decimal>,
    exec_qty: u64,
    exec_price: Decimal,
    state: OrderState,
    mark1: String,
    mark2: String,
    time: DateTime<Utc>,
}

impl Order {
    /// Create a new order in state [`OrderState::New`] with no executions.
    ///
    /// `price` must be `Some` for priced types and `None` for pure market
    /// types; [`Order::validate`] checks this before a trade accepts the
    /// order.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        instrument: Arc<Instrument>,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        qty: u64,
        tif: TimeInForce,
        destination: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            instrument,
            side,
            order_type,
            tif,
            destination: destination.into(),
            qty,
            price,
            exec_qty: 0,
            exec_price: Decimal::ZERO,
            state: OrderState::New,
            mark1: String::new(),
            mark2: String::new(),
            time,
        }
    }

    /// Order id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instrument the order trades.
    #[must_use]
    pub const fn instrument(&self) -> &Arc<Instrument> {
        &self.instrument
    }

    /// Ticker symbol of the order's instrument.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    /// Order side.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Order type.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        self.order_type
    }

    /// Time in force.
    #[must_use]
    pub const fn tif(&self) -> TimeInForce {
        self.tif
    }

    /// Routing destination.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Requested quantity.
    #[must_use]
    pub const fn qty(&self) -> u64 {
        self.qty
    }

    /// Limit/stop price; `None` for pure market types.
    #[must_use]
    pub const fn price(&self) -> Option<Decimal> {
        self.price
    }

    /// Cumulative executed quantity.
    #[must_use]
    pub const fn exec_qty(&self) -> u64 {
        self.exec_qty
    }

    /// Volume-weighted average execution price; meaningful iff
    /// `exec_qty() > 0`.
    #[must_use]
    pub const fn exec_price(&self) -> Decimal {
        self.exec_price
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> OrderState {
        self.state
    }

    /// First diagnostic mark; holds the reject reason after a reject.
    #[must_use]
    pub fn mark1(&self) -> &str {
        &self.mark1
    }

    /// Second diagnostic mark.
    #[must_use]
    pub fn mark2(&self) -> &str {
        &self.mark2
    }

    /// Set the second diagnostic mark.
    pub fn set_mark2(&mut self, mark: impl Into<String>) {
        self.mark2 = mark.into();
    }

    /// Creation instant.
    #[must_use]
    pub const fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Quantity still open for execution.
    #[must_use]
    pub const fn leaves_qty(&self) -> u64 {
        self.qty - self.exec_qty
    }

    /// Returns true for order types that carry a price.
    #[must_use]
    pub const fn is_priced(&self) -> bool {
        self.order_type.is_priced()
    }

    /// Returns true for opening/closing auction order types.
    #[must_use]
    pub const fn is_auction(&self) -> bool {
        self.order_type.is_auction()
    }

    /// Structural validation: non-empty identity fields, positive quantity,
    /// and a price consistent with the order type (present and positive for
    /// priced types, absent for market types).
    #[must_use]
    pub fn validate(&self) -> bool {
        if self.id.is_empty()
            || self.destination.is_empty()
            || self.instrument.symbol.is_empty()
            || self.qty == 0
        {
            return false;
        }
        if self.state == OrderState::Rejected {
            return false;
        }

        if self.order_type.is_priced() {
            matches!(self.price, Some(p) if p > Decimal::ZERO)
        } else {
            self.price.is_none()
        }
    }

    /// Record an execution of `qty` units at `price`.
    ///
    /// Maintains the volume-weighted average in `exec_price` and moves the
    /// order to `PartialFilled` or `Filled`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OrderUpdate`] when the order is already
    /// filled, the price is not positive, the quantity is zero, or the
    /// execution would exceed the open quantity.
    pub fn add_execution(&mut self, price: Decimal, qty: u64) -> Result<(), EngineError> {
        const CALLER: &str = "add_execution";

        if self.state == OrderState::Filled {
            return Err(EngineError::order_update(
                CALLER,
                &self.id,
                "order is already filled",
            ));
        }
        if price <= Decimal::ZERO {
            return Err(EngineError::order_update(
                CALLER,
                &self.id,
                format!("execution price must be positive, got {price}"),
            ));
        }
        if qty == 0 {
            return Err(EngineError::order_update(
                CALLER,
                &self.id,
                "execution quantity must be positive",
            ));
        }
        if qty > self.leaves_qty() {
            return Err(EngineError::order_update(
                CALLER,
                &self.id,
                format!(
                    "execution quantity {qty} exceeds open quantity {}",
                    self.leaves_qty()
                ),
            ));
        }

        let filled = Decimal::from(self.exec_qty);
        let incoming = Decimal::from(qty);
        self.exec_price = if self.exec_qty == 0 {
            price
        } else {
            (filled * self.exec_price + incoming * price) / (filled + incoming)
        };
        self.exec_qty += qty;
        self.state = if self.exec_qty == self.qty {
            OrderState::Filled
        } else {
            OrderState::PartialFilled
        };

        Ok(())
    }

    /// Transition `New -> Confirmed`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnexpectedOrderState`] when the order is not
    /// in state `New`.
    pub fn confirm(&mut self) -> Result<(), EngineError> {
        if self.state != OrderState::New {
            return Err(EngineError::unexpected_state(
                "confirm",
                &self.id,
                "New",
                self.state,
            ));
        }
        self.state = OrderState::Confirmed;
        Ok(())
    }

    /// Transition `Confirmed | PartialFilled -> Cancelled`.
    ///
    /// A `New` order cannot be cancelled: the broker has to acknowledge it
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnexpectedOrderState`] for every other state.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if !matches!(
            self.state,
            OrderState::Confirmed | OrderState::PartialFilled
        ) {
            return Err(EngineError::unexpected_state(
                "cancel",
                &self.id,
                "Confirmed or PartialFilled",
                self.state,
            ));
        }
        self.state = OrderState::Cancelled;
        Ok(())
    }

    /// Transition `New -> Rejected`, storing the broker's reason in `mark1`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnexpectedOrderState`] when the order is not
    /// in state `New`.
    pub fn reject(&mut self, reason: &str) -> Result<(), EngineError> {
        if self.state != OrderState::New {
            return Err(EngineError::unexpected_state(
                "reject",
                &self.id,
                "New",
                self.state,
            ));
        }
        debug_assert_eq!(self.exec_qty, 0, "a New order cannot have executions");

        self.state = OrderState::Rejected;
        self.mark1 = reason.to_string();
        Ok(())
    }

    /// Replace the order's price. State is unchanged; partial-fill safe.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnexpectedOrderType`] for unpriced order types
    /// and [`EngineError::OrderUpdate`] for a non-positive replacement price.
    pub fn replace(&mut self, new_price: Decimal) -> Result<(), EngineError> {
        if !self.is_priced() {
            return Err(EngineError::UnexpectedOrderType {
                caller: "replace",
                order_id: self.id.clone(),
                expected: "LMT, STP, LOO or LOC".to_string(),
                actual: self.order_type.to_string(),
            });
        }
        if new_price <= Decimal::ZERO {
            return Err(EngineError::order_update(
                "replace",
                &self.id,
                format!("replacement price must be positive, got {new_price}"),
            ));
        }
        self.price = Some(new_price);
        Ok(())
    }
}
