//! Runtime integration tests: the full strategy <-> broker dialog over real
//! channels, tick gating on outstanding confirmations, flip archiving and
//! reject handling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use strategy_engine::events::{
    CandleCloseEvent, CandleOpenEvent, CandlesHistoryEvent, Event, NewTickEvent,
    OrderConfirmationEvent, OrderFillEvent, OrderRejectedEvent,
};
use strategy_engine::marketdata::{Candle, Tick, Timeframe};
use strategy_engine::models::{Exchange, Instrument, OrderSide, OrderState, TimeOfDay};
use strategy_engine::strategy::{channel_pair, StrategyCtx, StrategyRuntime, UserStrategy};
use strategy_engine::{EngineConfig, EngineError, TradeState};
use tokio::sync::mpsc::error::TryRecvError;

type Action = Box<dyn FnOnce(&mut StrategyCtx<'_>) + Send>;

/// Strategy that runs one scripted action per tick and records what it saw.
struct ScriptedStrategy {
    actions: VecDeque<Action>,
    seen_ticks: Arc<Mutex<Vec<Tick>>>,
    seen_candles: Arc<Mutex<Vec<Candle>>>,
}

impl ScriptedStrategy {
    fn new(actions: VecDeque<Action>) -> (Self, Arc<Mutex<Vec<Tick>>>, Arc<Mutex<Vec<Candle>>>) {
        let seen_ticks = Arc::new(Mutex::new(Vec::new()));
        let seen_candles = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                actions,
                seen_ticks: Arc::clone(&seen_ticks),
                seen_candles: Arc::clone(&seen_candles),
            },
            seen_ticks,
            seen_candles,
        )
    }
}

impl UserStrategy for ScriptedStrategy {
    fn on_tick(&mut self, ctx: &mut StrategyCtx<'_>, tick: &Tick) {
        self.seen_ticks.lock().push(tick.clone());
        if let Some(action) = self.actions.pop_front() {
            action(ctx);
        }
    }

    fn on_candle_close(&mut self, _ctx: &mut StrategyCtx<'_>, candle: &Candle) {
        self.seen_candles.lock().push(candle.clone());
    }
}

fn spy() -> Arc<Instrument> {
    let exchange = Exchange::new(
        "NYSE",
        TimeOfDay::new(9, 30, 0),
        TimeOfDay::new(16, 0, 0),
    );
    Arc::new(Instrument::new("SPY", exchange, Decimal::new(1, 2), 100).unwrap())
}

fn price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, minute, 0).unwrap()
}

fn tick_event(instrument: &Arc<Instrument>, minute: u32, cents: i64) -> NewTickEvent {
    NewTickEvent::new(
        Arc::clone(instrument),
        Tick::new(at(minute), price(cents), 100),
    )
}

fn confirmation(instrument: &Arc<Instrument>, order_id: &str) -> Event {
    Event::OrderConfirmation(OrderConfirmationEvent {
        time: at(0),
        instrument: Arc::clone(instrument),
        order_id: order_id.to_string(),
    })
}

fn fill(instrument: &Arc<Instrument>, order_id: &str, cents: i64, qty: u64) -> Event {
    Event::OrderFill(OrderFillEvent {
        time: at(0),
        instrument: Arc::clone(instrument),
        order_id: order_id.to_string(),
        price: price(cents),
        qty,
    })
}

/// Poll until `cond` holds, or fail the test.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Drive one tick through the gating protocol: forward it, play the broker
/// side of the handshake and wait for ingestion to finish.
async fn deliver_tick(
    runtime: &Arc<StrategyRuntime<ScriptedStrategy>>,
    requests: &mut tokio::sync::mpsc::Receiver<Event>,
    broker_ready: &tokio::sync::mpsc::Sender<()>,
    event: NewTickEvent,
) {
    let tick_task = {
        let runtime = Arc::clone(runtime);
        tokio::spawn(async move { runtime.on_new_tick(event).await })
    };
    match requests.recv().await.expect("tick sync expected") {
        Event::NewTick(_) => {}
        other => panic!("expected tick sync, got {}", other.name()),
    }
    broker_ready.send(()).await.expect("broker ready");
    tick_task.await.expect("tick ingestion");
}

/// Receive the next outbound request and unwrap the order inside.
async fn recv_new_order(requests: &mut tokio::sync::mpsc::Receiver<Event>) -> String {
    match requests.recv().await.expect("request expected") {
        Event::NewOrderRequest(request) => {
            assert_eq!(request.order.state(), OrderState::New);
            request.order.id().to_string()
        }
        other => panic!("expected new order request, got {}", other.name()),
    }
}

#[tokio::test]
async fn test_order_dialog_open_and_cover() {
    let config = EngineConfig::default().with_n_periods(1);
    let (strategy_channels, broker) = channel_pair(&config);
    let mut requests = broker.requests;
    let broker_events = broker.broker_events;
    let broker_ready = broker.broker_ready;
    let mut notifications = broker.notifications;

    let mut actions: VecDeque<Action> = VecDeque::new();
    actions.push_back(Box::new(|ctx| {
        ctx.new_limit_order(price(5000), OrderSide::Buy, 100)
            .expect("buy order accepted");
    }));
    actions.push_back(Box::new(|ctx| {
        ctx.new_limit_order(price(5300), OrderSide::Sell, 100)
            .expect("sell order accepted");
    }));
    let (strategy, _seen_ticks, _seen_candles) = ScriptedStrategy::new(actions);

    let instrument = spy();
    let runtime = Arc::new(StrategyRuntime::new(
        Arc::clone(&instrument),
        "dialog-test",
        strategy,
        &config,
        strategy_channels,
    ));
    let loop_task = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };

    // Tick 1 places the buy.
    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 0, 5000)).await;
    let buy_id = recv_new_order(&mut requests).await;
    assert_eq!(runtime.in_flight(), 1);
    assert_eq!(runtime.position(), 0);

    broker_events
        .send(confirmation(&instrument, &buy_id))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        let buy_id = buy_id.clone();
        wait_until(move || runtime.order_is_confirmed(&buy_id)).await;
    }
    assert_eq!(runtime.in_flight(), 0);
    assert_eq!(runtime.open_orders().len(), 1);

    // Partial then completing fill.
    broker_events
        .send(fill(&instrument, &buy_id, 5000, 25))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        wait_until(move || runtime.position() == 25).await;
    }
    broker_events
        .send(fill(&instrument, &buy_id, 5200, 75))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        wait_until(move || runtime.position() == 100).await;
    }
    let trade = runtime.current_trade();
    assert_eq!(trade.state(), TradeState::Long);
    assert_eq!(trade.open_price(), Some(price(5150)));
    assert_eq!(trade.open_value(), Decimal::new(5150, 0));

    // Tick 2 places the cover.
    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 1, 5200)).await;
    let sell_id = recv_new_order(&mut requests).await;
    broker_events
        .send(confirmation(&instrument, &sell_id))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        let sell_id = sell_id.clone();
        wait_until(move || runtime.order_is_confirmed(&sell_id)).await;
    }
    broker_events
        .send(fill(&instrument, &sell_id, 5300, 100))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        wait_until(move || runtime.position() == 0).await;
    }

    // Old trade archived with its realized P&L; successor is flat.
    let closed = runtime.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].state(), TradeState::Closed);
    assert_eq!(closed[0].closed_pnl(), Decimal::new(150, 0));
    assert_eq!(runtime.current_trade().state(), TradeState::Flat);

    // Every ingested fill was forwarded on the notification channel.
    let mut fills = 0;
    while let Ok(event) = notifications.try_recv() {
        if matches!(event, Event::OrderFill(_)) {
            fills += 1;
        }
    }
    assert_eq!(fills, 3);

    runtime.finish();
    loop_task.await.unwrap();
}

#[tokio::test]
async fn test_tick_gating_waits_for_outstanding_confirmation() {
    let config = EngineConfig::default().with_n_periods(1);
    let (strategy_channels, broker) = channel_pair(&config);
    let mut requests = broker.requests;
    let broker_events = broker.broker_events;
    let broker_ready = broker.broker_ready;

    let mut actions: VecDeque<Action> = VecDeque::new();
    actions.push_back(Box::new(|ctx| {
        ctx.new_limit_order(price(5000), OrderSide::Buy, 10)
            .expect("order accepted");
    }));
    let (strategy, seen_ticks, _seen_candles) = ScriptedStrategy::new(actions);

    let instrument = spy();
    let runtime = Arc::new(StrategyRuntime::new(
        Arc::clone(&instrument),
        "gating-test",
        strategy,
        &config,
        strategy_channels,
    ));
    let loop_task = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };

    // Tick 1 places an order that stays unacknowledged.
    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 0, 5000)).await;
    let order_id = recv_new_order(&mut requests).await;
    assert_eq!(runtime.in_flight(), 1);
    assert_eq!(seen_ticks.lock().len(), 1);

    // Tick 2 must not reach the broker or the callback while the
    // confirmation is outstanding.
    let gated_tick = {
        let runtime = Arc::clone(&runtime);
        let event = tick_event(&instrument, 1, 5100);
        tokio::spawn(async move { runtime.on_new_tick(event).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(requests.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(seen_ticks.lock().len(), 1);
    assert!(!gated_tick.is_finished());

    // The confirmation opens the gate; the pending tick flows through.
    broker_events
        .send(confirmation(&instrument, &order_id))
        .await
        .unwrap();
    match requests.recv().await.expect("gated tick sync expected") {
        Event::NewTick(_) => {}
        other => panic!("expected tick sync, got {}", other.name()),
    }
    broker_ready.send(()).await.unwrap();
    gated_tick.await.unwrap();

    assert_eq!(runtime.in_flight(), 0);
    assert_eq!(seen_ticks.lock().len(), 2);

    runtime.finish();
    loop_task.await.unwrap();
}

#[tokio::test]
async fn test_flip_archives_trade_and_notifies_new_position() {
    let config = EngineConfig::default().with_n_periods(1);
    let (strategy_channels, broker) = channel_pair(&config);
    let mut requests = broker.requests;
    let broker_events = broker.broker_events;
    let broker_ready = broker.broker_ready;
    let mut notifications = broker.notifications;

    let mut actions: VecDeque<Action> = VecDeque::new();
    actions.push_back(Box::new(|ctx| {
        ctx.new_limit_order(price(10000), OrderSide::Buy, 10)
            .expect("buy accepted");
    }));
    actions.push_back(Box::new(|ctx| {
        ctx.new_limit_order(price(9000), OrderSide::Sell, 25)
            .expect("sell accepted");
    }));
    let (strategy, _seen_ticks, _seen_candles) = ScriptedStrategy::new(actions);

    let instrument = spy();
    let runtime = Arc::new(StrategyRuntime::new(
        Arc::clone(&instrument),
        "flip-test",
        strategy,
        &config,
        strategy_channels,
    ));
    let loop_task = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };

    // Open long 10 @ 100.00.
    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 0, 10000)).await;
    let buy_id = recv_new_order(&mut requests).await;
    broker_events
        .send(confirmation(&instrument, &buy_id))
        .await
        .unwrap();
    broker_events
        .send(fill(&instrument, &buy_id, 10000, 10))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        wait_until(move || runtime.position() == 10).await;
    }

    // Sell 25 @ 90.00: covers the long and opens a short 15.
    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 1, 9500)).await;
    let sell_id = recv_new_order(&mut requests).await;
    broker_events
        .send(confirmation(&instrument, &sell_id))
        .await
        .unwrap();
    broker_events
        .send(fill(&instrument, &sell_id, 9000, 25))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        wait_until(move || runtime.position() == -15).await;
    }

    let closed = runtime.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].closed_pnl(), Decimal::new(-100, 0));

    let current = runtime.current_trade();
    assert_eq!(current.state(), TradeState::Short);
    assert_eq!(current.qty(), 15);
    assert_eq!(current.open_price(), Some(price(9000)));
    assert_eq!(current.open_value(), Decimal::new(1350, 0));

    // The flip surfaced the new position to the portfolio side.
    let mut new_position = None;
    while let Ok(event) = notifications.try_recv() {
        if let Event::PortfolioNewPosition(event) = event {
            new_position = Some(event.trade);
        }
    }
    let new_position = new_position.expect("flip must notify a new position");
    assert_eq!(new_position.state(), TradeState::Short);
    assert_eq!(new_position.qty(), 15);

    runtime.finish();
    loop_task.await.unwrap();
}

#[tokio::test]
async fn test_reject_moves_order_and_cancel_of_rejected_id_fails() {
    let config = EngineConfig::default().with_n_periods(1);
    let (strategy_channels, broker) = channel_pair(&config);
    let mut requests = broker.requests;
    let broker_events = broker.broker_events;
    let broker_ready = broker.broker_ready;

    let rejected_id: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let cancel_error: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));

    let mut actions: VecDeque<Action> = VecDeque::new();
    {
        let rejected_id = Arc::clone(&rejected_id);
        actions.push_back(Box::new(move |ctx| {
            let id = ctx
                .new_limit_order(price(500), OrderSide::Buy, 10)
                .expect("order accepted");
            *rejected_id.lock() = Some(id);
        }));
    }
    {
        let rejected_id = Arc::clone(&rejected_id);
        let cancel_error = Arc::clone(&cancel_error);
        actions.push_back(Box::new(move |ctx| {
            let id = rejected_id.lock().clone().expect("id recorded");
            *cancel_error.lock() = ctx.cancel_order(&id).err();
        }));
    }
    let (strategy, _seen_ticks, _seen_candles) = ScriptedStrategy::new(actions);

    let instrument = spy();
    let runtime = Arc::new(StrategyRuntime::new(
        Arc::clone(&instrument),
        "reject-test",
        strategy,
        &config,
        strategy_channels,
    ));
    let loop_task = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };

    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 0, 5000)).await;
    let order_id = recv_new_order(&mut requests).await;

    broker_events
        .send(Event::OrderRejected(OrderRejectedEvent {
            time: at(0),
            instrument: Arc::clone(&instrument),
            order_id: order_id.clone(),
            reason: "price too low".to_string(),
        }))
        .await
        .unwrap();
    {
        let runtime = Arc::clone(&runtime);
        let order_id = order_id.clone();
        wait_until(move || {
            runtime
                .current_trade()
                .rejected_orders()
                .contains_key(&order_id)
        })
        .await;
    }
    assert_eq!(runtime.in_flight(), 0);

    let trade = runtime.current_trade();
    let rejected = &trade.rejected_orders()[&order_id];
    assert_eq!(rejected.state(), OrderState::Rejected);
    assert_eq!(rejected.mark1(), "price too low");

    // A cancel for the rejected id fails synchronously inside the callback.
    deliver_tick(&runtime, &mut requests, &broker_ready, tick_event(&instrument, 1, 5100)).await;
    let err = cancel_error.lock().clone().expect("cancel must fail");
    assert!(matches!(err, EngineError::TradeOperation { .. }));

    runtime.finish();
    loop_task.await.unwrap();
}

#[tokio::test]
async fn test_candle_windows_and_open_mark() {
    let config = EngineConfig::default().with_n_periods(3);
    let (strategy_channels, _broker) = channel_pair(&config);
    let (strategy, _seen_ticks, seen_candles) = ScriptedStrategy::new(VecDeque::new());

    let instrument = spy();
    let runtime = StrategyRuntime::new(
        Arc::clone(&instrument),
        "candle-test",
        strategy,
        &config,
        strategy_channels,
    );

    let candle = |minute: u32, open: i64| {
        Candle::new(
            price(open),
            price(open + 100),
            price(open - 100),
            price(open + 50),
            10_000,
            at(minute),
        )
    };

    // Two closes: window below capacity, callback not yet invoked.
    for minute in 0..2 {
        runtime.on_candle_close(CandleCloseEvent::new(
            Arc::clone(&instrument),
            candle(minute, 10000 + i64::from(minute)),
            Timeframe::Minutes(1),
        ));
    }
    assert!(seen_candles.lock().is_empty());

    // Third close warms the window and fires the callback.
    runtime.on_candle_close(CandleCloseEvent::new(
        Arc::clone(&instrument),
        candle(2, 10002),
        Timeframe::Minutes(1),
    ));
    assert_eq!(seen_candles.lock().len(), 1);
    assert_eq!(runtime.last_candle_open(), Some(price(10002)));

    // History merge: duplicates keep the first seen, invalid bars dropped,
    // window truncated to capacity.
    let mut bad = candle(3, 10010);
    bad.low = price(20000);
    runtime.on_candles_history(CandlesHistoryEvent {
        time: at(4),
        instrument: Arc::clone(&instrument),
        candles: vec![candle(2, 99999), bad, candle(3, 10003), candle(4, 10004)],
    });
    let window = runtime.candles();
    assert_eq!(window.len(), 3);
    assert_eq!(window[0].datetime, at(2));
    // The duplicate at minute 2 kept the original bar.
    assert_eq!(window[0].open, price(10002));
    assert_eq!(runtime.last_candle_open(), Some(price(10004)));

    // A stale candle open cannot move the mark backwards.
    runtime.on_candle_open(CandleOpenEvent {
        time: at(0),
        instrument: Arc::clone(&instrument),
        candle_time: at(0),
        price: price(1),
        timeframe: Timeframe::Minutes(1),
    });
    assert_eq!(runtime.last_candle_open(), Some(price(10004)));

    // A fresh one advances it.
    runtime.on_candle_open(CandleOpenEvent {
        time: at(5),
        instrument: Arc::clone(&instrument),
        candle_time: at(5),
        price: price(10005),
        timeframe: Timeframe::Minutes(1),
    });
    assert_eq!(runtime.last_candle_open(), Some(price(10005)));
}
