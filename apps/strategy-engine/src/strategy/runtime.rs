//! Strategy runtime: market event ingestion, the broker dialog and user
//! callback invocation.
//!
//! One runtime drives one strategy on one instrument. All mutable state
//! (current trade, closed-trade archive, candle/tick windows, clock) sits
//! behind a single mutex; in-flight request tracking uses an atomic counter
//! so the tick gate can spin-free wait without touching that mutex. The
//! broker dialog runs over bounded mpsc channels and the event loop exits
//! on a cancellation token.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::window::SeriesWindow;
use super::UserStrategy;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{
    CandleCloseEvent, CandleOpenEvent, CandlesHistoryEvent, Event, NewOrderRequest, NewTickEvent,
    OrderCancelEvent, OrderCancelRejectEvent, OrderCancelRequest, OrderConfirmationEvent,
    OrderFillEvent, OrderRejectedEvent, OrderReplaceRejectEvent, OrderReplaceRequest,
    OrderReplacedEvent, PortfolioNewPositionEvent, StrategyRequestNotDeliveredEvent,
    TickHistoryEvent,
};
use crate::marketdata::{Candle, Tick};
use crate::models::{Instrument, Order, OrderSide, OrderType, TimeInForce, Trade};

/// In-flight tag prefix for new-order requests.
const NEW_ORDER_TAG_PREFIX: &str = "NO$";

/// In-flight tag prefix for cancel requests.
const CANCEL_TAG_PREFIX: &str = "CAN$";

/// Strategy-side endpoints of the broker dialog.
#[derive(Debug)]
pub struct StrategyChannels {
    /// Requests and tick syncs flowing to the broker.
    pub requests: mpsc::Sender<Event>,
    /// Order lifecycle responses flowing back from the broker.
    pub broker_events: mpsc::Receiver<Event>,
    /// Single-slot tick-sync handshake.
    pub broker_ready: mpsc::Receiver<()>,
    /// Strategy-originated notifications for portfolio aggregation.
    pub notifications: mpsc::Sender<Event>,
    /// Best-effort error reporting.
    pub errors: mpsc::Sender<EngineError>,
}

/// Broker-side endpoints of the broker dialog.
#[derive(Debug)]
pub struct BrokerChannels {
    /// Requests and tick syncs arriving from the strategy.
    pub requests: mpsc::Receiver<Event>,
    /// Order lifecycle responses flowing to the strategy.
    pub broker_events: mpsc::Sender<Event>,
    /// Single-slot tick-sync handshake.
    pub broker_ready: mpsc::Sender<()>,
    /// Strategy-originated notifications.
    pub notifications: mpsc::Receiver<Event>,
    /// Errors forwarded by the strategy.
    pub errors: mpsc::Receiver<EngineError>,
}

/// Build the paired channel endpoints for one strategy/broker dialog.
#[must_use]
pub fn channel_pair(config: &EngineConfig) -> (StrategyChannels, BrokerChannels) {
    let (requests_tx, requests_rx) = mpsc::channel(config.request_channel_capacity);
    let (broker_tx, broker_rx) = mpsc::channel(config.broker_channel_capacity);
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let (notify_tx, notify_rx) = mpsc::channel(config.notify_channel_capacity);
    let (errors_tx, errors_rx) = mpsc::channel(config.error_channel_capacity);

    (
        StrategyChannels {
            requests: requests_tx,
            broker_events: broker_rx,
            broker_ready: ready_rx,
            notifications: notify_tx,
            errors: errors_tx,
        },
        BrokerChannels {
            requests: requests_rx,
            broker_events: broker_tx,
            broker_ready: ready_tx,
            notifications: notify_rx,
            errors: errors_rx,
        },
    )
}

/// Most recent candle open price and its bar timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleOpenMark {
    /// Open price of the bar.
    pub price: Decimal,
    /// Bar timestamp.
    pub time: DateTime<Utc>,
}

/// Requests awaiting a broker response.
///
/// The counter gates market ticks; the tag set pairs each response with the
/// request that caused it so an unsolicited response cannot drive the
/// counter negative. Both are touched without the strategy state mutex.
#[derive(Debug, Default)]
struct PendingRequests {
    in_flight: AtomicI32,
    idle: Notify,
    tags: Mutex<HashSet<String>>,
}

impl PendingRequests {
    /// Track a request. Returns false if the tag is already pending.
    fn register(&self, tag: String) -> bool {
        if !self.tags.lock().insert(tag) {
            return false;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Settle a request on broker response. Returns false for a tag that
    /// was never registered.
    fn acknowledge(&self, tag: &str) -> bool {
        if !self.tags.lock().remove(tag) {
            return false;
        }
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
        true
    }

    fn count(&self) -> i32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until every registered request has been settled.
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Mutable strategy state guarded by the runtime's single mutex.
struct StrategyState<S> {
    strategy: S,
    current_trade: Trade,
    closed_trades: Vec<Trade>,
    candles: SeriesWindow<Candle>,
    ticks: SeriesWindow<Tick>,
    last_candle_open: Option<CandleOpenMark>,
    most_recent_time: Option<DateTime<Utc>>,
}

/// Event-driven runtime for one strategy on one instrument.
///
/// Market data enters through the `on_*` handler methods; broker responses
/// are pumped by [`StrategyRuntime::run`]. The two sides may run on
/// different tasks: every public method takes `&self` and the runtime is
/// shared as `Arc<StrategyRuntime<S>>`.
pub struct StrategyRuntime<S: UserStrategy> {
    instrument: Arc<Instrument>,
    name: String,
    n_periods: usize,
    state: Mutex<StrategyState<S>>,
    pending: PendingRequests,
    requests: mpsc::Sender<Event>,
    notifications: mpsc::Sender<Event>,
    errors: mpsc::Sender<EngineError>,
    broker_events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    broker_ready: tokio::sync::Mutex<mpsc::Receiver<()>>,
    shutdown: CancellationToken,
}

impl<S: UserStrategy> StrategyRuntime<S> {
    /// Create a runtime for `strategy` wired to the given channel endpoints.
    #[must_use]
    pub fn new(
        instrument: Arc<Instrument>,
        name: impl Into<String>,
        strategy: S,
        config: &EngineConfig,
        channels: StrategyChannels,
    ) -> Self {
        let current_trade = Trade::new_flat(Arc::clone(&instrument));
        Self {
            instrument,
            name: name.into(),
            n_periods: config.n_periods,
            state: Mutex::new(StrategyState {
                strategy,
                current_trade,
                closed_trades: Vec::new(),
                candles: SeriesWindow::new(config.n_periods),
                ticks: SeriesWindow::new(config.n_periods),
                last_candle_open: None,
                most_recent_time: None,
            }),
            pending: PendingRequests::default(),
            requests: channels.requests,
            notifications: channels.notifications,
            errors: channels.errors,
            broker_events: tokio::sync::Mutex::new(channels.broker_events),
            broker_ready: tokio::sync::Mutex::new(channels.broker_ready),
            shutdown: CancellationToken::new(),
        }
    }

    /// Strategy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instrument this strategy trades.
    #[must_use]
    pub const fn instrument(&self) -> &Arc<Instrument> {
        &self.instrument
    }

    /// Token that terminates the event loop when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal the event loop to exit at its next channel read.
    pub fn finish(&self) {
        self.shutdown.cancel();
    }

    /// Signed position: positive long, negative short, zero otherwise.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.state.lock().current_trade.signed_qty()
    }

    /// Snapshot of the confirmed (working) orders on the current trade.
    #[must_use]
    pub fn open_orders(&self) -> HashMap<String, Order> {
        self.state.lock().current_trade.confirmed_orders().clone()
    }

    /// Returns true if an order with this id is working at the broker.
    #[must_use]
    pub fn order_is_confirmed(&self, order_id: &str) -> bool {
        self.state
            .lock()
            .current_trade
            .has_confirmed_order_with_id(order_id)
    }

    /// Snapshot of the current trade.
    #[must_use]
    pub fn current_trade(&self) -> Trade {
        self.state.lock().current_trade.clone()
    }

    /// Snapshot of the closed-trade archive.
    #[must_use]
    pub fn closed_trades(&self) -> Vec<Trade> {
        self.state.lock().closed_trades.clone()
    }

    /// Most recent candle open price, if any candle has been seen.
    #[must_use]
    pub fn last_candle_open(&self) -> Option<Decimal> {
        self.state.lock().last_candle_open.map(|mark| mark.price)
    }

    /// Number of order requests awaiting a broker response.
    #[must_use]
    pub fn in_flight(&self) -> i32 {
        self.pending.count()
    }

    /// Snapshot of the candle window, oldest first.
    #[must_use]
    pub fn candles(&self) -> Vec<Candle> {
        self.state.lock().candles.as_slice().to_vec()
    }

    /// Snapshot of the tick window, oldest first.
    #[must_use]
    pub fn ticks(&self) -> Vec<Tick> {
        self.state.lock().ticks.as_slice().to_vec()
    }

    /// Pump broker responses until the shutdown token fires or the broker
    /// closes its channel.
    pub async fn run(&self) {
        let mut broker_events = self.broker_events.lock().await;
        info!(
            strategy = %self.name,
            symbol = %self.instrument.symbol,
            "strategy event loop started"
        );
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = broker_events.recv() => match event {
                    Some(event) => self.dispatch_broker_event(event),
                    None => break,
                },
            }
        }
        info!(strategy = %self.name, "strategy event loop stopped");
    }

    /// Route a broker response to its handler.
    ///
    /// # Panics
    ///
    /// Panics when a strategy-side request or market data event shows up on
    /// the broker response channel; that is a wiring defect, not a runtime
    /// condition.
    fn dispatch_broker_event(&self, event: Event) {
        debug!(strategy = %self.name, event = event.name(), "broker event");
        match event {
            Event::OrderConfirmation(e) => self.on_order_confirmation(&e),
            Event::OrderFill(e) => self.on_order_fill(e),
            Event::OrderCancel(e) => self.on_order_cancel(&e),
            Event::OrderCancelReject(e) => self.on_order_cancel_reject(&e),
            Event::OrderRejected(e) => self.on_order_rejected(&e),
            Event::OrderReplaced(e) => self.on_order_replaced(&e),
            Event::OrderReplaceReject(e) => self.on_order_replace_reject(&e),
            Event::TimerTick(_) | Event::StrategyFinished(_) => {}
            Event::EndOfData(_) => self.shutdown.cancel(),
            other => panic!("unexpected event on the broker channel: {}", other.name()),
        }
    }

    // ------------------------------------------------------------------
    // Order dialog handlers
    // ------------------------------------------------------------------

    fn on_order_confirmation(&self, event: &OrderConfirmationEvent) {
        self.acknowledge(NEW_ORDER_TAG_PREFIX, &event.order_id);
        let result = {
            let mut state = self.state.lock();
            state.current_trade.confirm_order(&event.order_id)
        };
        if let Err(err) = result {
            self.report(err);
        }
    }

    fn on_order_fill(&self, event: OrderFillEvent) {
        const CALLER: &str = "on_order_fill";

        if event.instrument.symbol != self.instrument.symbol {
            self.report(EngineError::trade_operation(
                CALLER,
                &event.order_id,
                format!(
                    "fill for symbol {} on a {} strategy",
                    event.instrument.symbol, self.instrument.symbol
                ),
            ));
            return;
        }
        if event.qty == 0 {
            self.report(EngineError::order_update(
                CALLER,
                &event.order_id,
                "fill quantity must be positive",
            ));
            return;
        }
        if event.price <= Decimal::ZERO {
            self.report(EngineError::order_update(
                CALLER,
                &event.order_id,
                format!("fill price must be positive, got {}", event.price),
            ));
            return;
        }

        let executed = {
            let mut state = self.state.lock();
            match state.current_trade.execute_order(
                &event.order_id,
                event.qty,
                event.price,
                event.time,
            ) {
                Err(err) => Err(err),
                Ok(None) => Ok(None),
                Ok(Some(successor)) => {
                    let opened = successor.is_open().then(|| successor.clone());
                    let closed = std::mem::replace(&mut state.current_trade, successor);
                    state.closed_trades.push(closed);
                    Ok(opened)
                }
            }
        };

        match executed {
            Err(err) => self.report(err),
            Ok(opened) => {
                if let Some(trade) = opened {
                    self.notify(Event::PortfolioNewPosition(PortfolioNewPositionEvent {
                        time: event.time,
                        instrument: Arc::clone(&self.instrument),
                        trade,
                    }));
                }
                self.notify(Event::OrderFill(event));
            }
        }
    }

    fn on_order_cancel(&self, event: &OrderCancelEvent) {
        self.acknowledge(CANCEL_TAG_PREFIX, &event.order_id);
        let result = {
            let mut state = self.state.lock();
            state.current_trade.cancel_order(&event.order_id)
        };
        if let Err(err) = result {
            self.report(err);
        }
    }

    fn on_order_cancel_reject(&self, event: &OrderCancelRejectEvent) {
        self.acknowledge(CANCEL_TAG_PREFIX, &event.order_id);
        warn!(
            strategy = %self.name,
            order_id = %event.order_id,
            reason = %event.reason,
            "cancel request rejected"
        );
    }

    fn on_order_rejected(&self, event: &OrderRejectedEvent) {
        self.acknowledge(NEW_ORDER_TAG_PREFIX, &event.order_id);
        let result = {
            let mut state = self.state.lock();
            state
                .current_trade
                .reject_order(&event.order_id, &event.reason)
        };
        if let Err(err) = result {
            self.report(err);
        }
    }

    fn on_order_replaced(&self, event: &OrderReplacedEvent) {
        let result = {
            let mut state = self.state.lock();
            state
                .current_trade
                .replace_order(&event.order_id, event.new_price)
        };
        if let Err(err) = result {
            self.report(err);
        }
    }

    fn on_order_replace_reject(&self, event: &OrderReplaceRejectEvent) {
        warn!(
            strategy = %self.name,
            order_id = %event.order_id,
            reason = %event.reason,
            "replace request rejected"
        );
    }

    // ------------------------------------------------------------------
    // Market data handlers
    // ------------------------------------------------------------------

    /// Ingest a live tick.
    ///
    /// Blocks until every outstanding order request is settled, forwards
    /// the tick to the broker for clock sync, waits for the broker-ready
    /// handshake, and only then mutates state and invokes the user
    /// callback. The callback fires once the tick window holds `n_periods`
    /// entries.
    pub async fn on_new_tick(&self, event: NewTickEvent) {
        self.pending.wait_idle().await;

        if self
            .requests
            .send(Event::NewTick(event.clone()))
            .await
            .is_err()
        {
            self.report(EngineError::delivery_failure(
                "on_new_tick",
                "",
                "request channel closed",
            ));
            return;
        }
        if self.broker_ready.lock().await.recv().await.is_none() {
            warn!(strategy = %self.name, "broker ready channel closed; dropping tick");
            return;
        }

        if !event.tick.is_valid() {
            return;
        }

        let mut state = self.state.lock();
        state.most_recent_time = Some(event.tick.datetime);
        state.ticks.push(event.tick.clone());
        if state.current_trade.is_open() {
            if let Err(err) = state
                .current_trade
                .update_pnl(event.tick.last_price, event.tick.datetime)
            {
                self.report(err);
                return;
            }
        }
        if state.ticks.len() < self.n_periods {
            return;
        }
        self.invoke(&mut state, |strategy, ctx| {
            strategy.on_tick(ctx, &event.tick);
        });
    }

    /// Ingest a candle open: refresh the open-price mark (monotonically),
    /// mark the position to the open price and invoke the optional
    /// callback.
    pub fn on_candle_open(&self, event: CandleOpenEvent) {
        let mut state = self.state.lock();
        if state
            .last_candle_open
            .map_or(true, |mark| event.candle_time >= mark.time)
        {
            state.last_candle_open = Some(CandleOpenMark {
                price: event.price,
                time: event.candle_time,
            });
        }
        if state.current_trade.is_open() {
            if let Err(err) = state
                .current_trade
                .update_pnl(event.price, event.candle_time)
            {
                self.report(err);
                return;
            }
        }
        self.invoke(&mut state, |strategy, ctx| {
            strategy.on_candle_open(ctx, &event);
        });
    }

    /// Ingest a candle close: append to the window, mark the position to
    /// the close price and invoke the optional callback once the window
    /// holds `n_periods` entries.
    pub fn on_candle_close(&self, event: CandleCloseEvent) {
        if !event.candle.is_valid() {
            debug!(strategy = %self.name, "dropping invalid candle");
            return;
        }

        let mut state = self.state.lock();
        state.candles.push(event.candle.clone());
        Self::refresh_candle_open_mark(&mut state);
        if state.current_trade.is_open() {
            if let Err(err) = state
                .current_trade
                .update_pnl(event.candle.close, event.candle.datetime)
            {
                self.report(err);
                return;
            }
        }
        if state.candles.len() < self.n_periods {
            return;
        }
        self.invoke(&mut state, |strategy, ctx| {
            strategy.on_candle_close(ctx, &event.candle);
        });
    }

    /// Merge a batch of historical candles into the window.
    pub fn on_candles_history(&self, event: CandlesHistoryEvent) {
        let mut state = self.state.lock();
        state.candles.merge_history(event.candles, Candle::is_valid);
        Self::refresh_candle_open_mark(&mut state);
    }

    /// Merge a batch of historical ticks into the window.
    pub fn on_tick_history(&self, event: TickHistoryEvent) {
        let mut state = self.state.lock();
        state.ticks.merge_history(event.ticks, Tick::is_valid);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Advance the candle-open mark to the window's newest bar; never moves
    /// backwards.
    fn refresh_candle_open_mark(state: &mut StrategyState<S>) {
        if let Some(last) = state.candles.last() {
            let newer = state
                .last_candle_open
                .map_or(true, |mark| last.datetime > mark.time);
            if newer {
                state.last_candle_open = Some(CandleOpenMark {
                    price: last.open,
                    time: last.datetime,
                });
            }
        }
    }

    /// Invoke a user callback with a context borrowing the locked state.
    fn invoke(
        &self,
        state: &mut StrategyState<S>,
        f: impl FnOnce(&mut S, &mut StrategyCtx<'_>),
    ) {
        let StrategyState {
            strategy,
            current_trade,
            candles,
            ticks,
            last_candle_open,
            most_recent_time,
            ..
        } = state;
        let mut ctx = StrategyCtx {
            instrument: &self.instrument,
            trade: current_trade,
            candles,
            ticks,
            last_candle_open: *last_candle_open,
            most_recent_time: *most_recent_time,
            pending: &self.pending,
            requests: &self.requests,
            notifications: &self.notifications,
        };
        f(strategy, &mut ctx);
    }

    /// Settle the in-flight tag for a broker response.
    fn acknowledge(&self, prefix: &str, order_id: &str) {
        let tag = format!("{prefix}{order_id}");
        if !self.pending.acknowledge(&tag) {
            warn!(
                strategy = %self.name,
                tag = %tag,
                "broker response without a matching pending request"
            );
        }
    }

    /// Best-effort, non-blocking error forwarding.
    fn report(&self, error: EngineError) {
        warn!(strategy = %self.name, error = %error, "engine error");
        if self.errors.try_send(error).is_err() {
            debug!(strategy = %self.name, "errors channel full or closed; error dropped");
        }
    }

    /// Best-effort, non-blocking notification forwarding.
    fn notify(&self, event: Event) {
        if self.notifications.try_send(event).is_err() {
            warn!(
                strategy = %self.name,
                "notification channel full or closed; notification dropped"
            );
        }
    }
}

/// Strategy API handed to user callbacks.
///
/// Borrows the runtime's locked state for the duration of one callback, so
/// every operation here runs under the strategy mutex.
pub struct StrategyCtx<'a> {
    instrument: &'a Arc<Instrument>,
    trade: &'a mut Trade,
    candles: &'a SeriesWindow<Candle>,
    ticks: &'a SeriesWindow<Tick>,
    last_candle_open: Option<CandleOpenMark>,
    most_recent_time: Option<DateTime<Utc>>,
    pending: &'a PendingRequests,
    requests: &'a mpsc::Sender<Event>,
    notifications: &'a mpsc::Sender<Event>,
}

impl StrategyCtx<'_> {
    /// Instrument the strategy trades.
    #[must_use]
    pub const fn instrument(&self) -> &Arc<Instrument> {
        self.instrument
    }

    /// Read-only view of the current trade.
    #[must_use]
    pub fn trade(&self) -> &Trade {
        self.trade
    }

    /// Signed position: positive long, negative short, zero otherwise.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.trade.signed_qty()
    }

    /// Confirmed (working) orders on the current trade.
    #[must_use]
    pub fn open_orders(&self) -> &HashMap<String, Order> {
        self.trade.confirmed_orders()
    }

    /// Returns true if an order with this id is working at the broker.
    #[must_use]
    pub fn order_is_confirmed(&self, order_id: &str) -> bool {
        self.trade.has_confirmed_order_with_id(order_id)
    }

    /// Most recent candle open price.
    #[must_use]
    pub fn last_candle_open(&self) -> Option<Decimal> {
        self.last_candle_open.map(|mark| mark.price)
    }

    /// Timestamp of the most recent ingested tick.
    #[must_use]
    pub const fn most_recent_time(&self) -> Option<DateTime<Utc>> {
        self.most_recent_time
    }

    /// Candle window, oldest first.
    #[must_use]
    pub fn candles(&self) -> &[Candle] {
        self.candles.as_slice()
    }

    /// Tick window, oldest first.
    #[must_use]
    pub fn ticks(&self) -> &[Tick] {
        self.ticks.as_slice()
    }

    /// Submit a day limit order, returning its id.
    ///
    /// The order is registered on the current trade, tracked as awaiting
    /// confirmation, and emitted to the broker as a
    /// [`Event::NewOrderRequest`].
    ///
    /// # Errors
    ///
    /// Returns an error when the order fails validation, the id is already
    /// pending, or the request cannot be handed to the broker; in the
    /// latter cases the order is rolled back off the trade.
    pub fn new_limit_order(
        &mut self,
        price: Decimal,
        side: OrderSide,
        qty: u64,
    ) -> Result<String, EngineError> {
        const CALLER: &str = "new_limit_order";

        let time = self
            .most_recent_time
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let nonce: u64 = rand::random();
        let id = format!(
            "{}|{}|{}_{}_{:x}",
            self.instrument.symbol,
            side.tag(),
            price,
            OrderType::Limit.tag(),
            nonce
        );
        let order = Order::new(
            id.clone(),
            Arc::clone(self.instrument),
            side,
            OrderType::Limit,
            Some(price),
            qty,
            TimeInForce::Day,
            self.instrument.exchange.name.clone(),
            time,
        );
        if !order.validate() {
            return Err(EngineError::invalid_order(
                CALLER,
                id,
                "order failed validation",
            ));
        }

        let request = Event::NewOrderRequest(NewOrderRequest {
            time,
            instrument: Arc::clone(self.instrument),
            order: order.clone(),
        });
        self.trade.put_new_order(order)?;

        let tag = format!("{NEW_ORDER_TAG_PREFIX}{id}");
        if !self.pending.register(tag.clone()) {
            self.trade.take_new_order(&id);
            return Err(EngineError::trade_operation(
                CALLER,
                &id,
                "order is already awaiting confirmation",
            ));
        }
        if let Err(err) = self.requests.try_send(request) {
            self.pending.acknowledge(&tag);
            self.trade.take_new_order(&id);
            self.surface_undelivered(err.into_inner());
            return Err(EngineError::delivery_failure(
                CALLER,
                &id,
                "request channel full or closed",
            ));
        }
        Ok(id)
    }

    /// Ask the broker to cancel a working order.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is empty or not among the confirmed
    /// orders, a cancel for it is already pending, or the request cannot be
    /// handed to the broker.
    pub fn cancel_order(&mut self, order_id: &str) -> Result<(), EngineError> {
        const CALLER: &str = "cancel_order";

        if order_id.is_empty() {
            return Err(EngineError::trade_operation(
                CALLER,
                "",
                "order id not specified",
            ));
        }
        if !self.trade.has_confirmed_order_with_id(order_id) {
            return Err(EngineError::trade_operation(
                CALLER,
                order_id,
                "order id not found in confirmed orders",
            ));
        }

        let tag = format!("{CANCEL_TAG_PREFIX}{order_id}");
        if !self.pending.register(tag.clone()) {
            return Err(EngineError::trade_operation(
                CALLER,
                order_id,
                "cancel is already awaiting confirmation",
            ));
        }
        let request = Event::OrderCancelRequest(OrderCancelRequest {
            time: self
                .most_recent_time
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            instrument: Arc::clone(self.instrument),
            order_id: order_id.to_string(),
        });
        if let Err(err) = self.requests.try_send(request) {
            self.pending.acknowledge(&tag);
            self.surface_undelivered(err.into_inner());
            return Err(EngineError::delivery_failure(
                CALLER,
                order_id,
                "request channel full or closed",
            ));
        }
        Ok(())
    }

    /// Ask the broker to change a working order's price.
    ///
    /// Replace requests do not gate market ticks; the price mutation lands
    /// when the broker answers with [`Event::OrderReplaced`].
    ///
    /// # Errors
    ///
    /// Returns an error when the id is not among the confirmed orders or
    /// the request cannot be handed to the broker.
    pub fn replace_order(
        &mut self,
        order_id: &str,
        new_price: Decimal,
    ) -> Result<(), EngineError> {
        const CALLER: &str = "replace_order";

        if !self.trade.has_confirmed_order_with_id(order_id) {
            return Err(EngineError::trade_operation(
                CALLER,
                order_id,
                "order id not found in confirmed orders",
            ));
        }
        let request = Event::OrderReplaceRequest(OrderReplaceRequest {
            time: self
                .most_recent_time
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            instrument: Arc::clone(self.instrument),
            order_id: order_id.to_string(),
            new_price,
        });
        if let Err(err) = self.requests.try_send(request) {
            self.surface_undelivered(err.into_inner());
            return Err(EngineError::delivery_failure(
                CALLER,
                order_id,
                "request channel full or closed",
            ));
        }
        Ok(())
    }

    /// Surface an undeliverable request on the notification channel,
    /// best-effort.
    fn surface_undelivered(&self, request: Event) {
        let event = Event::StrategyRequestNotDelivered(StrategyRequestNotDeliveredEvent {
            time: request.time(),
            instrument: Arc::clone(self.instrument),
            request: Box::new(request),
        });
        if self.notifications.try_send(event).is_err() {
            warn!("notification channel full or closed; undelivered request dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_register_and_acknowledge() {
        let pending = PendingRequests::default();
        assert_eq!(pending.count(), 0);

        assert!(pending.register("NO$a".to_string()));
        assert!(pending.register("CAN$b".to_string()));
        assert_eq!(pending.count(), 2);

        // Duplicate registration refused.
        assert!(!pending.register("NO$a".to_string()));
        assert_eq!(pending.count(), 2);

        assert!(pending.acknowledge("NO$a"));
        assert_eq!(pending.count(), 1);
        assert!(pending.acknowledge("CAN$b"));
        assert_eq!(pending.count(), 0);
    }

    #[test]
    fn test_unsolicited_acknowledge_cannot_go_negative() {
        let pending = PendingRequests::default();
        assert!(!pending.acknowledge("NO$ghost"));
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_once_settled() {
        let pending = Arc::new(PendingRequests::default());
        assert!(pending.register("NO$a".to_string()));

        let waiter = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                pending.wait_idle().await;
            })
        };

        // Give the waiter a chance to park before settling.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        pending.acknowledge("NO$a");
        waiter.await.expect("waiter must finish");
    }

    #[tokio::test]
    async fn test_wait_idle_with_nothing_pending_is_immediate() {
        let pending = PendingRequests::default();
        pending.wait_idle().await;
    }
}
