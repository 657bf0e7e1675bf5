//! Event taxonomy for the strategy <-> broker dialog and market data flow.
//!
//! The set is closed: market data events, order dialog requests
//! (strategy -> broker), order dialog responses (broker -> strategy) and
//! control events. Every event carries its instant and its instrument.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::marketdata::{Candle, Tick, Timeframe};
use crate::models::{Instrument, Order, Trade};

/// A new bar has opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleOpenEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument the bar belongs to.
    pub instrument: Arc<Instrument>,
    /// Bar open timestamp.
    pub candle_time: DateTime<Utc>,
    /// Bar open price.
    pub price: Decimal,
    /// Bar aggregation unit.
    pub timeframe: Timeframe,
}

/// A bar has closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleCloseEvent {
    /// Event instant, derived from the bar open plus the timeframe.
    pub time: DateTime<Utc>,
    /// Instrument the bar belongs to.
    pub instrument: Arc<Instrument>,
    /// The completed bar.
    pub candle: Candle,
    /// Bar aggregation unit.
    pub timeframe: Timeframe,
}

impl CandleCloseEvent {
    /// Create a close event for `candle`, deriving the event time from the
    /// bar open and the timeframe (daily bars close at end of day, intraday
    /// bars after their minute span).
    #[must_use]
    pub fn new(instrument: Arc<Instrument>, candle: Candle, timeframe: Timeframe) -> Self {
        Self {
            time: timeframe.close_time(candle.datetime),
            instrument,
            candle,
            timeframe,
        }
    }
}

/// A batch of historical bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandlesHistoryEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument the bars belong to.
    pub instrument: Arc<Instrument>,
    /// Historical bars, not necessarily sorted or unique.
    pub candles: Vec<Candle>,
}

/// A live trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTickEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument the print belongs to.
    pub instrument: Arc<Instrument>,
    /// The print.
    pub tick: Tick,
}

impl NewTickEvent {
    /// Create a tick event stamped with the tick's own instant.
    #[must_use]
    pub fn new(instrument: Arc<Instrument>, tick: Tick) -> Self {
        Self {
            time: tick.datetime,
            instrument,
            tick,
        }
    }
}

/// A batch of historical trade prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickHistoryEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument the prints belong to.
    pub instrument: Arc<Instrument>,
    /// Historical prints, not necessarily sorted or unique.
    pub ticks: Vec<Tick>,
}

/// Strategy asks the broker to work a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderRequest {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// The order as submitted.
    pub order: Order,
}

/// Strategy asks the broker to cancel a working order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelRequest {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the order to cancel.
    pub order_id: String,
}

/// Strategy asks the broker to change a working order's price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReplaceRequest {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the order to replace.
    pub order_id: String,
    /// Replacement price.
    pub new_price: Decimal,
}

/// Broker acknowledged an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmationEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the acknowledged order.
    pub order_id: String,
}

/// Broker reports an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFillEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the executed order.
    pub order_id: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub qty: u64,
}

/// Broker cancelled an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the cancelled order.
    pub order_id: String,
}

/// Broker refused a cancel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelRejectEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the order the cancel concerned.
    pub order_id: String,
    /// Broker's reason.
    pub reason: String,
}

/// Broker replaced an order's price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReplacedEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the replaced order.
    pub order_id: String,
    /// Price now working at the broker.
    pub new_price: Decimal,
}

/// Broker refused a replace request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReplaceRejectEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the order the replace concerned.
    pub order_id: String,
    /// Broker's reason.
    pub reason: String,
}

/// Broker rejected a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the order.
    pub instrument: Arc<Instrument>,
    /// Id of the rejected order.
    pub order_id: String,
    /// Broker's reason.
    pub reason: String,
}

/// Periodic timer pulse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerTickEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the owning strategy.
    pub instrument: Arc<Instrument>,
}

/// The feed has no more data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndOfDataEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the owning strategy.
    pub instrument: Arc<Instrument>,
}

/// A strategy finished its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyFinishedEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the owning strategy.
    pub instrument: Arc<Instrument>,
    /// Name of the finished strategy.
    pub strategy: String,
}

/// A new position was opened; consumed by portfolio aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioNewPositionEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the position.
    pub instrument: Arc<Instrument>,
    /// Snapshot of the newly opened trade.
    pub trade: Trade,
}

/// A strategy request could not be handed to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRequestNotDeliveredEvent {
    /// Event instant.
    pub time: DateTime<Utc>,
    /// Instrument of the owning strategy.
    pub instrument: Arc<Instrument>,
    /// The request that was not delivered.
    pub request: Box<Event>,
}

/// The closed set of engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// A new bar has opened.
    CandleOpen(CandleOpenEvent),
    /// A bar has closed.
    CandleClose(CandleCloseEvent),
    /// A batch of historical bars.
    CandlesHistory(CandlesHistoryEvent),
    /// A live trade print.
    NewTick(NewTickEvent),
    /// A batch of historical trade prints.
    TickHistory(TickHistoryEvent),
    /// Strategy asks the broker to work a new order.
    NewOrderRequest(NewOrderRequest),
    /// Strategy asks the broker to cancel a working order.
    OrderCancelRequest(OrderCancelRequest),
    /// Strategy asks the broker to change a working order's price.
    OrderReplaceRequest(OrderReplaceRequest),
    /// Broker acknowledged an order.
    OrderConfirmation(OrderConfirmationEvent),
    /// Broker reports an execution.
    OrderFill(OrderFillEvent),
    /// Broker cancelled an order.
    OrderCancel(OrderCancelEvent),
    /// Broker refused a cancel request.
    OrderCancelReject(OrderCancelRejectEvent),
    /// Broker replaced an order's price.
    OrderReplaced(OrderReplacedEvent),
    /// Broker refused a replace request.
    OrderReplaceReject(OrderReplaceRejectEvent),
    /// Broker rejected a new order.
    OrderRejected(OrderRejectedEvent),
    /// Periodic timer pulse.
    TimerTick(TimerTickEvent),
    /// The feed has no more data.
    EndOfData(EndOfDataEvent),
    /// A strategy finished its run.
    StrategyFinished(StrategyFinishedEvent),
    /// A new position was opened.
    PortfolioNewPosition(PortfolioNewPositionEvent),
    /// A strategy request could not be handed to the broker.
    StrategyRequestNotDelivered(StrategyRequestNotDeliveredEvent),
}

impl Event {
    /// Event instant.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Self::CandleOpen(e) => e.time,
            Self::CandleClose(e) => e.time,
            Self::CandlesHistory(e) => e.time,
            Self::NewTick(e) => e.time,
            Self::TickHistory(e) => e.time,
            Self::NewOrderRequest(e) => e.time,
            Self::OrderCancelRequest(e) => e.time,
            Self::OrderReplaceRequest(e) => e.time,
            Self::OrderConfirmation(e) => e.time,
            Self::OrderFill(e) => e.time,
            Self::OrderCancel(e) => e.time,
            Self::OrderCancelReject(e) => e.time,
            Self::OrderReplaced(e) => e.time,
            Self::OrderReplaceReject(e) => e.time,
            Self::OrderRejected(e) => e.time,
            Self::TimerTick(e) => e.time,
            Self::EndOfData(e) => e.time,
            Self::StrategyFinished(e) => e.time,
            Self::PortfolioNewPosition(e) => e.time,
            Self::StrategyRequestNotDelivered(e) => e.time,
        }
    }

    /// Instrument the event concerns.
    #[must_use]
    pub fn instrument(&self) -> &Arc<Instrument> {
        match self {
            Self::CandleOpen(e) => &e.instrument,
            Self::CandleClose(e) => &e.instrument,
            Self::CandlesHistory(e) => &e.instrument,
            Self::NewTick(e) => &e.instrument,
            Self::TickHistory(e) => &e.instrument,
            Self::NewOrderRequest(e) => &e.instrument,
            Self::OrderCancelRequest(e) => &e.instrument,
            Self::OrderReplaceRequest(e) => &e.instrument,
            Self::OrderConfirmation(e) => &e.instrument,
            Self::OrderFill(e) => &e.instrument,
            Self::OrderCancel(e) => &e.instrument,
            Self::OrderCancelReject(e) => &e.instrument,
            Self::OrderReplaced(e) => &e.instrument,
            Self::OrderReplaceReject(e) => &e.instrument,
            Self::OrderRejected(e) => &e.instrument,
            Self::TimerTick(e) => &e.instrument,
            Self::EndOfData(e) => &e.instrument,
            Self::StrategyFinished(e) => &e.instrument,
            Self::PortfolioNewPosition(e) => &e.instrument,
            Self::StrategyRequestNotDelivered(e) => &e.instrument,
        }
    }

    /// Ticker symbol of the event's instrument.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.instrument().symbol
    }

    /// Stable event name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CandleOpen(_) => "CandleOpen",
            Self::CandleClose(_) => "CandleClose",
            Self::CandlesHistory(_) => "CandlesHistory",
            Self::NewTick(_) => "NewTick",
            Self::TickHistory(_) => "TickHistory",
            Self::NewOrderRequest(_) => "NewOrderRequest",
            Self::OrderCancelRequest(_) => "OrderCancelRequest",
            Self::OrderReplaceRequest(_) => "OrderReplaceRequest",
            Self::OrderConfirmation(_) => "OrderConfirmation",
            Self::OrderFill(_) => "OrderFill",
            Self::OrderCancel(_) => "OrderCancel",
            Self::OrderCancelReject(_) => "OrderCancelReject",
            Self::OrderReplaced(_) => "OrderReplaced",
            Self::OrderReplaceReject(_) => "OrderReplaceReject",
            Self::OrderRejected(_) => "OrderRejected",
            Self::TimerTick(_) => "TimerTick",
            Self::EndOfData(_) => "EndOfData",
            Self::StrategyFinished(_) => "StrategyFinished",
            Self::PortfolioNewPosition(_) => "PortfolioNewPosition",
            Self::StrategyRequestNotDelivered(_) => "StrategyRequestNotDelivered",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time(), self.name(), self.symbol())
    }
}
