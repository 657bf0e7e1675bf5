//! End-to-end trade lifecycle scenarios driven through the public crate
//! surface: opening with partial fills, covering flat, flipping sides, and
//! the order bookkeeping around cancels and rejects.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use strategy_engine::models::{
    Exchange, Instrument, Order, OrderSide, OrderState, OrderType, TimeInForce, TimeOfDay, Trade,
    TradeState,
};
use strategy_engine::EngineError;

fn spy() -> Arc<Instrument> {
    let exchange = Exchange::new(
        "NYSE",
        TimeOfDay::new(9, 30, 0),
        TimeOfDay::new(16, 0, 0),
    );
    Arc::new(Instrument::new("SPY", exchange, Decimal::new(1, 2), 100).unwrap())
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn limit_order(id: &str, side: OrderSide, limit_cents: i64, qty: u64) -> Order {
    Order::new(
        id,
        spy(),
        side,
        OrderType::Limit,
        Some(price(limit_cents)),
        qty,
        TimeInForce::Day,
        "NYSE",
        t0(),
    )
}

fn place_confirmed(trade: &mut Trade, id: &str, side: OrderSide, limit_cents: i64, qty: u64) {
    trade
        .put_new_order(limit_order(id, side, limit_cents, qty))
        .unwrap();
    trade.confirm_order(id).unwrap();
}

/// S1: open long via partial then completing fill; entry price is the
/// volume-weighted average.
#[test]
fn test_open_long_partial_then_full_fill() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "buy", OrderSide::Buy, 5000, 100);

    assert!(trade
        .execute_order("buy", 25, price(5000), t0())
        .unwrap()
        .is_none());
    assert_eq!(trade.state(), TradeState::Long);
    assert_eq!(trade.qty(), 25);
    assert_eq!(trade.open_price(), Some(price(5000)));
    assert_eq!(trade.open_pnl(), Decimal::ZERO);

    assert!(trade
        .execute_order("buy", 75, price(5200), t0())
        .unwrap()
        .is_none());
    assert_eq!(trade.qty(), 100);
    assert_eq!(trade.open_price(), Some(price(5150)));
    assert_eq!(trade.open_value(), Decimal::new(5150, 0));

    let filled = &trade.filled_orders()["buy"];
    assert_eq!(filled.state(), OrderState::Filled);
    assert_eq!(filled.exec_price(), price(5150));
}

/// S2: full cover closes the trade, realizes P&L and hands back a flat
/// successor with empty books.
#[test]
fn test_full_cover_realizes_and_goes_flat() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "buy", OrderSide::Buy, 5000, 100);
    trade.execute_order("buy", 25, price(5000), t0()).unwrap();
    trade.execute_order("buy", 75, price(5200), t0()).unwrap();

    place_confirmed(&mut trade, "sell", OrderSide::Sell, 5300, 100);
    let successor = trade
        .execute_order("sell", 100, price(5300), t0())
        .unwrap()
        .expect("full cover produces a successor");

    assert_eq!(trade.state(), TradeState::Closed);
    assert_eq!(trade.closed_pnl(), Decimal::new(150, 0));
    assert_eq!(trade.qty(), 0);
    assert!(trade.close_time().is_some());

    assert_eq!(successor.state(), TradeState::Flat);
    assert!(successor.new_orders().is_empty());
    assert!(successor.confirmed_orders().is_empty());
}

/// S3: a covering fill larger than the position closes the long and opens
/// a short for the excess.
#[test]
fn test_flip_long_to_short() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "buy", OrderSide::Buy, 10000, 10);
    trade.execute_order("buy", 10, price(10000), t0()).unwrap();

    place_confirmed(&mut trade, "flip", OrderSide::Sell, 9000, 25);
    let successor = trade
        .execute_order("flip", 25, price(9000), t0())
        .unwrap()
        .expect("flip produces a successor");

    assert_eq!(trade.state(), TradeState::Closed);
    assert_eq!(trade.closed_pnl(), Decimal::new(-100, 0));

    assert_eq!(successor.state(), TradeState::Short);
    assert_eq!(successor.qty(), 15);
    assert_eq!(successor.open_price(), Some(price(9000)));
    assert_eq!(successor.open_value(), Decimal::new(1350, 0));

    // Conservation: covered quantity plus successor quantity equals the
    // incoming fill.
    assert_eq!(10 + successor.qty(), 25);
}

/// S4: cancel after confirmation leaves the trade flat with the order in
/// the cancelled book.
#[test]
fn test_cancel_after_confirm() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "buy", OrderSide::Buy, 1000, 50);

    trade.cancel_order("buy").unwrap();
    assert_eq!(trade.state(), TradeState::Flat);
    assert_eq!(trade.cancelled_orders()["buy"].state(), OrderState::Cancelled);
    assert!(!trade.has_confirmed_order_with_id("buy"));
}

/// S5: reject on a new order stores the reason; cancelling the same id
/// afterwards fails.
#[test]
fn test_reject_on_new_then_cancel_fails() {
    let mut trade = Trade::new_flat(spy());
    trade
        .put_new_order(limit_order("buy", OrderSide::Buy, 500, 10))
        .unwrap();

    trade.reject_order("buy", "price too low").unwrap();
    let rejected = &trade.rejected_orders()["buy"];
    assert_eq!(rejected.state(), OrderState::Rejected);
    assert_eq!(rejected.mark1(), "price too low");

    let err = trade.cancel_order("buy").unwrap_err();
    assert!(matches!(err, EngineError::TradeOperation { .. }));
}

/// Realized P&L accumulated across a chain of trades equals the sum of the
/// per-cover contributions.
#[test]
fn test_closed_pnl_accumulates_across_covers() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "open", OrderSide::Buy, 10000, 100);
    trade.execute_order("open", 100, price(10000), t0()).unwrap();

    // Cover 30 at +2.00, 20 at -1.00, then the remaining 50 at +0.50.
    place_confirmed(&mut trade, "c1", OrderSide::Sell, 10200, 30);
    trade.execute_order("c1", 30, price(10200), t0()).unwrap();
    assert_eq!(trade.closed_pnl(), Decimal::new(60, 0));

    place_confirmed(&mut trade, "c2", OrderSide::Sell, 9900, 20);
    trade.execute_order("c2", 20, price(9900), t0()).unwrap();
    assert_eq!(trade.closed_pnl(), Decimal::new(40, 0));

    place_confirmed(&mut trade, "c3", OrderSide::Sell, 10050, 50);
    let successor = trade
        .execute_order("c3", 50, price(10050), t0())
        .unwrap()
        .expect("final cover closes the trade");

    // 60 - 20 + 25
    assert_eq!(trade.closed_pnl(), Decimal::new(65, 0));
    assert_eq!(successor.state(), TradeState::Flat);
}

/// The five books stay disjoint and the id witness matches their union
/// through a full lifecycle, including a flip carry-over.
#[test]
fn test_book_partition_survives_flip() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "open", OrderSide::Buy, 10000, 10);
    trade.execute_order("open", 10, price(10000), t0()).unwrap();

    // Live intent to be inherited.
    place_confirmed(&mut trade, "working", OrderSide::Sell, 11000, 5);
    trade
        .put_new_order(limit_order("fresh", OrderSide::Buy, 9000, 5))
        .unwrap();

    place_confirmed(&mut trade, "flip", OrderSide::Sell, 9500, 30);
    let successor = trade
        .execute_order("flip", 30, price(9500), t0())
        .unwrap()
        .expect("flip produces a successor");

    // Closed trade keeps the terminal books only.
    assert!(trade.new_orders().is_empty());
    assert!(trade.confirmed_orders().is_empty());
    assert!(trade.filled_orders().contains_key("open"));
    assert!(trade.filled_orders().contains_key("flip"));

    // Successor carries the live intent and nothing else.
    assert_eq!(successor.new_orders().len(), 1);
    assert_eq!(successor.confirmed_orders().len(), 1);
    assert_eq!(successor.all_order_ids().len(), 2);
    assert!(successor.all_order_ids().contains("working"));
    assert!(successor.all_order_ids().contains("fresh"));

    // Inherited ids still reject duplicates on the successor.
    let mut successor = successor;
    let err = successor
        .put_new_order(limit_order("working", OrderSide::Sell, 11000, 5))
        .unwrap_err();
    assert!(matches!(err, EngineError::TradeOperation { .. }));
}

/// Marking an open position appends snapshots with both P&L components.
#[test]
fn test_returns_time_series() {
    let mut trade = Trade::new_flat(spy());
    place_confirmed(&mut trade, "open", OrderSide::Buy, 10000, 10);
    trade.execute_order("open", 10, price(10000), t0()).unwrap();

    place_confirmed(&mut trade, "c1", OrderSide::Sell, 10100, 5);
    trade.execute_order("c1", 5, price(10100), t0()).unwrap();

    trade.update_pnl(price(10200), t0()).unwrap();
    trade.update_pnl(price(10300), t0()).unwrap();

    let returns = trade.returns();
    assert_eq!(returns.len(), 2);
    // 5 still open, entry 100.00: (102.00 - 100.00) * 5 = 10, then 15.
    assert_eq!(returns[0].open_pnl, Decimal::new(10, 0));
    assert_eq!(returns[1].open_pnl, Decimal::new(15, 0));
    // Realized 5 * 1.00 = 5 in both snapshots.
    assert_eq!(returns[0].closed_pnl, Decimal::new(5, 0));
    assert_eq!(returns[1].closed_pnl, Decimal::new(5, 0));
}
