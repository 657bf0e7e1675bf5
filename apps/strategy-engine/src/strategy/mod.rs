//! Strategy runtime and the user-strategy callback surface.

mod runtime;
mod window;

pub use runtime::{
    channel_pair, BrokerChannels, CandleOpenMark, StrategyChannels, StrategyCtx, StrategyRuntime,
};
pub use window::{SeriesWindow, Timestamped};

use crate::events::CandleOpenEvent;
use crate::marketdata::{Candle, Tick};

/// Callback surface a user strategy implements.
///
/// Callbacks run on the runtime's market data path while the strategy mutex
/// is held, so they may freely read windows and place orders through the
/// [`StrategyCtx`] without further synchronization.
pub trait UserStrategy: Send {
    /// Called for every live tick once the tick window is warm.
    fn on_tick(&mut self, ctx: &mut StrategyCtx<'_>, tick: &Tick);

    /// Called when a new bar opens.
    fn on_candle_open(&mut self, ctx: &mut StrategyCtx<'_>, event: &CandleOpenEvent) {
        let _ = (ctx, event);
    }

    /// Called when a bar closes, once the candle window is warm.
    fn on_candle_close(&mut self, ctx: &mut StrategyCtx<'_>, candle: &Candle) {
        let _ = (ctx, candle);
    }
}
