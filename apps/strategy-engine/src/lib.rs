//! Event-driven single-instrument trading strategy engine.
//!
//! The engine turns strategy intent ("buy 100 at limit 50") into tracked
//! orders, executions and realized/unrealized P&L. It ingests market data
//! events (ticks, candle opens/closes, history batches) and broker
//! responses (confirmations, fills, cancels, replaces, rejects) and emits
//! order requests over channels.
//!
//! # Architecture
//!
//! - [`models`]: instruments, the [`models::Order`] lifecycle state machine
//!   and the [`models::Trade`] position state machine with its P&L
//!   accounting.
//! - [`marketdata`]: candle/tick containers, validation and timeframes.
//! - [`events`]: the closed event taxonomy of the strategy <-> broker
//!   dialog.
//! - [`strategy`]: the per-strategy runtime — bounded market data windows,
//!   in-flight request gating, ordered dispatch and the
//!   [`strategy::UserStrategy`] callback surface.
//! - [`error`]: structured error taxonomy carrying caller and order-id
//!   context.
//!
//! # Concurrency
//!
//! Each strategy is single-threaded cooperative: one event loop reads
//! broker responses, one mutex guards the trade and window state, and an
//! atomic in-flight counter gates live ticks until every outstanding order
//! request is acknowledged. Strategies are independent; run as many in
//! parallel as needed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod events;
pub mod marketdata;
pub mod models;
pub mod strategy;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::Event;
pub use marketdata::{Candle, Tick, Timeframe};
pub use models::{
    Exchange, Instrument, Order, OrderSide, OrderState, OrderType, TimeInForce, TimeOfDay, Trade,
    TradeState,
};
pub use strategy::{
    channel_pair, BrokerChannels, StrategyChannels, StrategyCtx, StrategyRuntime, UserStrategy,
};
