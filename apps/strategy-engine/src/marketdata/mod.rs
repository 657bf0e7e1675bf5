//! Market data containers: candles, ticks and timeframes.

mod candle;
mod tick;
mod timeframe;

pub use candle::Candle;
pub use tick::Tick;
pub use timeframe::{ParseTimeframeError, Timeframe};
