//! Core domain types: instruments, orders and trades.

mod instrument;
mod order;
mod trade;

pub use instrument::{Exchange, Instrument, InstrumentError, TimeOfDay};
pub use order::{Order, OrderSide, OrderState, OrderType, TimeInForce};
pub use trade::{Trade, TradeReturn, TradeState};
