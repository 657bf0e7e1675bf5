//! Trade aggregate: the open position in one instrument and the orders that
//! created it.
//!
//! A trade moves `Flat -> Long | Short -> Closed`. Covering executions
//! realize P&L into `closed_pnl`; an execution that covers more than the
//! open quantity closes the trade and produces a successor carrying the
//! opposite side for the excess. `Closed` is terminal.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Instrument, Order, OrderSide, OrderState};
use crate::error::EngineError;

/// Trade position state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    /// No position; orders may be working.
    Flat,
    /// Net long position.
    Long,
    /// Net short position.
    Short,
    /// Fully covered. Terminal.
    Closed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flat => "Flat",
            Self::Long => "Long",
            Self::Short => "Short",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// A P&L snapshot appended on every mark-to-market update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReturn {
    /// Mark-to-market profit on the open quantity.
    pub open_pnl: Decimal,
    /// Realized profit accumulated so far.
    pub closed_pnl: Decimal,
    /// Snapshot instant.
    pub time: DateTime<Utc>,
}

/// The aggregate position for one instrument.
///
/// Owns its orders outright, partitioned by lifecycle state into five books
/// keyed by order id. An order id appears in exactly one book; the witness
/// set rejects duplicates in O(1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    instrument: Arc<Instrument>,
    id: String,
    state: TradeState,
    qty: u64,
    first_price: Option<Decimal>,
    open_price: Option<Decimal>,
    open_value: Decimal,
    market_value: Decimal,
    open_time: Option<DateTime<Utc>>,
    close_time: Option<DateTime<Utc>>,
    new_orders: HashMap<String, Order>,
    confirmed_orders: HashMap<String, Order>,
    filled_orders: HashMap<String, Order>,
    cancelled_orders: HashMap<String, Order>,
    rejected_orders: HashMap<String, Order>,
    all_order_ids: HashSet<String>,
    open_pnl: Decimal,
    closed_pnl: Decimal,
    returns: Vec<TradeReturn>,
}

impl Trade {
    /// Create a flat trade with empty order books.
    #[must_use]
    pub fn new_flat(instrument: Arc<Instrument>) -> Self {
        Self {
            instrument,
            id: String::new(),
            state: TradeState::Flat,
            qty: 0,
            first_price: None,
            open_price: None,
            open_value: Decimal::ZERO,
            market_value: Decimal::ZERO,
            open_time: None,
            close_time: None,
            new_orders: HashMap::new(),
            confirmed_orders: HashMap::new(),
            filled_orders: HashMap::new(),
            cancelled_orders: HashMap::new(),
            rejected_orders: HashMap::new(),
            all_order_ids: HashSet::new(),
            open_pnl: Decimal::ZERO,
            closed_pnl: Decimal::ZERO,
            returns: Vec::new(),
        }
    }

    /// Successor for a cover-and-flip: opens the opposite side with the
    /// excess quantity and inherits the still-live order books.
    #[allow(clippy::too_many_arguments)]
    fn new_flipped(
        instrument: Arc<Instrument>,
        id: String,
        state: TradeState,
        qty: u64,
        price: Decimal,
        time: DateTime<Utc>,
        new_orders: HashMap<String, Order>,
        confirmed_orders: HashMap<String, Order>,
    ) -> Self {
        let open_value = price * Decimal::from(qty);
        let mut trade = Self {
            instrument,
            id,
            state,
            qty,
            first_price: Some(price),
            open_price: Some(price),
            open_value,
            market_value: open_value,
            open_time: Some(time),
            close_time: None,
            new_orders,
            confirmed_orders,
            filled_orders: HashMap::new(),
            cancelled_orders: HashMap::new(),
            rejected_orders: HashMap::new(),
            all_order_ids: HashSet::new(),
            open_pnl: Decimal::ZERO,
            closed_pnl: Decimal::ZERO,
            returns: Vec::new(),
        };
        trade.rebuild_order_ids();
        trade
    }

    /// Instrument this trade is in.
    #[must_use]
    pub const fn instrument(&self) -> &Arc<Instrument> {
        &self.instrument
    }

    /// Ticker symbol of the trade's instrument.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    /// Trade id; equals the opening order's id once the trade opens.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current position state.
    #[must_use]
    pub const fn state(&self) -> TradeState {
        self.state
    }

    /// Open quantity.
    #[must_use]
    pub const fn qty(&self) -> u64 {
        self.qty
    }

    /// Signed position: positive long, negative short, zero otherwise.
    #[must_use]
    pub fn signed_qty(&self) -> i64 {
        let qty = i64::try_from(self.qty).unwrap_or(i64::MAX);
        match self.state {
            TradeState::Long => qty,
            TradeState::Short => -qty,
            TradeState::Flat | TradeState::Closed => 0,
        }
    }

    /// Price of the first opening execution.
    #[must_use]
    pub const fn first_price(&self) -> Option<Decimal> {
        self.first_price
    }

    /// Volume-weighted average entry price; `None` while flat.
    #[must_use]
    pub const fn open_price(&self) -> Option<Decimal> {
        self.open_price
    }

    /// Entry price times open quantity.
    #[must_use]
    pub const fn open_value(&self) -> Decimal {
        self.open_value
    }

    /// Last market price times open quantity.
    #[must_use]
    pub const fn market_value(&self) -> Decimal {
        self.market_value
    }

    /// Instant of the opening execution.
    #[must_use]
    pub const fn open_time(&self) -> Option<DateTime<Utc>> {
        self.open_time
    }

    /// Instant of the closing execution.
    #[must_use]
    pub const fn close_time(&self) -> Option<DateTime<Utc>> {
        self.close_time
    }

    /// Mark-to-market profit on the open quantity.
    #[must_use]
    pub const fn open_pnl(&self) -> Decimal {
        self.open_pnl
    }

    /// Realized profit accumulated by covering executions.
    #[must_use]
    pub const fn closed_pnl(&self) -> Decimal {
        self.closed_pnl
    }

    /// P&L snapshots appended by [`Trade::update_pnl`].
    #[must_use]
    pub fn returns(&self) -> &[TradeReturn] {
        &self.returns
    }

    /// Orders submitted but not yet acknowledged.
    #[must_use]
    pub const fn new_orders(&self) -> &HashMap<String, Order> {
        &self.new_orders
    }

    /// Orders acknowledged and working at the broker.
    #[must_use]
    pub const fn confirmed_orders(&self) -> &HashMap<String, Order> {
        &self.confirmed_orders
    }

    /// Fully executed orders.
    #[must_use]
    pub const fn filled_orders(&self) -> &HashMap<String, Order> {
        &self.filled_orders
    }

    /// Cancelled orders.
    #[must_use]
    pub const fn cancelled_orders(&self) -> &HashMap<String, Order> {
        &self.cancelled_orders
    }

    /// Rejected orders.
    #[must_use]
    pub const fn rejected_orders(&self) -> &HashMap<String, Order> {
        &self.rejected_orders
    }

    /// Union of order ids across the five books.
    #[must_use]
    pub const fn all_order_ids(&self) -> &HashSet<String> {
        &self.all_order_ids
    }

    /// Returns true when the trade holds an open position.
    ///
    /// # Panics
    ///
    /// Panics if a long or short trade carries zero quantity; that state is
    /// unreachable through the trade's own operations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self.state {
            TradeState::Long | TradeState::Short => {
                assert!(self.qty > 0, "zero quantity in an open position");
                true
            }
            TradeState::Flat | TradeState::Closed => false,
        }
    }

    /// Returns true if an order with this id is working at the broker.
    #[must_use]
    pub fn has_confirmed_order_with_id(&self, id: &str) -> bool {
        self.confirmed_orders.contains_key(id)
    }

    /// Accept a freshly created order into the `new` book.
    ///
    /// # Errors
    ///
    /// Returns an error when the trade is closed, the order fails
    /// [`Order::validate`], the symbols differ, the order is not in state
    /// `New`, or the id is already known to any book.
    pub fn put_new_order(&mut self, order: Order) -> Result<(), EngineError> {
        const CALLER: &str = "put_new_order";

        if self.state == TradeState::Closed {
            return Err(EngineError::trade_operation(
                CALLER,
                order.id(),
                "cannot put an order into a closed trade",
            ));
        }
        if !order.validate() {
            return Err(EngineError::invalid_order(
                CALLER,
                order.id(),
                "order failed validation",
            ));
        }
        if order.symbol() != self.symbol() {
            return Err(EngineError::trade_operation(
                CALLER,
                order.id(),
                format!(
                    "order symbol {} does not match trade symbol {}",
                    order.symbol(),
                    self.symbol()
                ),
            ));
        }
        if order.state() != OrderState::New {
            return Err(EngineError::unexpected_state(
                CALLER,
                order.id(),
                "New",
                order.state(),
            ));
        }
        if self.all_order_ids.contains(order.id()) {
            return Err(EngineError::trade_operation(
                CALLER,
                order.id(),
                "an order with this id is already in the trade",
            ));
        }

        self.all_order_ids.insert(order.id().to_string());
        self.new_orders.insert(order.id().to_string(), order);
        Ok(())
    }

    /// Remove a just-submitted order that never reached the broker.
    ///
    /// Used by the runtime to roll back a failed request delivery so the id
    /// becomes usable again.
    pub(crate) fn take_new_order(&mut self, id: &str) -> Option<Order> {
        let order = self.new_orders.remove(id)?;
        self.all_order_ids.remove(id);
        Some(order)
    }

    /// Move an order `new -> confirmed` on broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is not in the `new` book or the order
    /// refuses the transition.
    pub fn confirm_order(&mut self, id: &str) -> Result<(), EngineError> {
        match self.new_orders.get_mut(id) {
            None => Err(EngineError::trade_operation(
                "confirm_order",
                id,
                "id not found in new orders",
            )),
            Some(order) => {
                order.confirm()?;
                if let Some(order) = self.new_orders.remove(id) {
                    self.confirmed_orders.insert(id.to_string(), order);
                }
                Ok(())
            }
        }
    }

    /// Move an order `confirmed -> cancelled`.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is not in the `confirmed` book or the
    /// order refuses the transition.
    pub fn cancel_order(&mut self, id: &str) -> Result<(), EngineError> {
        match self.confirmed_orders.get_mut(id) {
            None => Err(EngineError::trade_operation(
                "cancel_order",
                id,
                "id not found in confirmed orders",
            )),
            Some(order) => {
                order.cancel()?;
                if let Some(order) = self.confirmed_orders.remove(id) {
                    self.cancelled_orders.insert(id.to_string(), order);
                }
                Ok(())
            }
        }
    }

    /// Replace the price of a confirmed order. The order keeps its book and
    /// state.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is not in the `confirmed` book or the
    /// order refuses the replacement.
    pub fn replace_order(&mut self, id: &str, new_price: Decimal) -> Result<(), EngineError> {
        match self.confirmed_orders.get_mut(id) {
            None => Err(EngineError::trade_operation(
                "replace_order",
                id,
                "id not found in confirmed orders",
            )),
            Some(order) => order.replace(new_price),
        }
    }

    /// Move an order `new -> rejected`, storing the broker's reason.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is not in the `new` book or the order
    /// refuses the transition.
    pub fn reject_order(&mut self, id: &str, reason: &str) -> Result<(), EngineError> {
        match self.new_orders.get_mut(id) {
            None => Err(EngineError::trade_operation(
                "reject_order",
                id,
                "id not found in new orders",
            )),
            Some(order) => {
                order.reject(reason)?;
                if let Some(order) = self.new_orders.remove(id) {
                    self.rejected_orders.insert(id.to_string(), order);
                }
                Ok(())
            }
        }
    }

    /// Apply an execution of `qty` units at `exec_price` to the confirmed
    /// order `id` and update the position.
    ///
    /// An execution that fully covers the position closes this trade and
    /// returns a successor: a flat trade for an exact cover, or an open
    /// trade on the opposite side for a cover-and-flip. The successor
    /// inherits the `new` and `confirmed` books (still-live intent); filled,
    /// cancelled and rejected orders stay with the closed trade. The caller
    /// archives this trade and adopts the successor.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is not a confirmed order (a fill for an
    /// already filled id is reported distinctly), the quantity is zero, or
    /// the quantity exceeds the order's open quantity.
    ///
    /// # Panics
    ///
    /// Panics on a non-positive execution price; callers validate prices at
    /// the boundary, so this is unreachable through the runtime.
    pub fn execute_order(
        &mut self,
        id: &str,
        qty: u64,
        exec_price: Decimal,
        time: DateTime<Utc>,
    ) -> Result<Option<Self>, EngineError> {
        const CALLER: &str = "execute_order";

        assert!(
            exec_price > Decimal::ZERO,
            "non-positive execution price for order {id}"
        );

        let Some(order) = self.confirmed_orders.get_mut(id) else {
            if self.filled_orders.contains_key(id) {
                return Err(EngineError::trade_operation(
                    CALLER,
                    id,
                    "execution for an already filled order",
                ));
            }
            return Err(EngineError::trade_operation(
                CALLER,
                id,
                "id not found in confirmed orders",
            ));
        };

        if qty == 0 {
            return Err(EngineError::order_update(
                CALLER,
                id,
                "execution quantity must be positive",
            ));
        }
        if qty > order.leaves_qty() {
            return Err(EngineError::order_update(
                CALLER,
                id,
                format!(
                    "execution quantity {qty} exceeds open order quantity {}",
                    order.leaves_qty()
                ),
            ));
        }

        let side = order.side();
        let completes_order = qty == order.leaves_qty();

        // A completing fill moves the order out of the confirmed book first,
        // so that a duplicate fill for the same id is caught above instead
        // of silently re-executing.
        if completes_order {
            if let Some(order) = self.confirmed_orders.remove(id) {
                self.filled_orders.insert(id.to_string(), order);
            }
            if let Some(order) = self.filled_orders.get_mut(id) {
                order.add_execution(exec_price, qty)?;
            }
        } else if let Some(order) = self.confirmed_orders.get_mut(id) {
            order.add_execution(exec_price, qty)?;
        }

        Ok(self.apply_position_update(id, side, qty, exec_price, time))
    }

    /// Position arithmetic for an executed fill. Returns the successor
    /// trade when the fill closes the position.
    fn apply_position_update(
        &mut self,
        order_id: &str,
        side: OrderSide,
        qty: u64,
        exec_price: Decimal,
        time: DateTime<Utc>,
    ) -> Option<Self> {
        let fill = Decimal::from(qty);

        match self.state {
            TradeState::Flat => {
                self.state = match side {
                    OrderSide::Buy => TradeState::Long,
                    OrderSide::Sell => TradeState::Short,
                };
                self.id = order_id.to_string();
                self.qty = qty;
                self.first_price = Some(exec_price);
                self.open_price = Some(exec_price);
                self.open_value = exec_price * fill;
                self.market_value = self.open_value;
                self.open_time = Some(time);
                None
            }
            TradeState::Long if side == OrderSide::Buy => {
                self.add_to_position(qty, exec_price);
                None
            }
            TradeState::Short if side == OrderSide::Sell => {
                self.add_to_position(qty, exec_price);
                None
            }
            TradeState::Long | TradeState::Short => {
                self.cover_position(order_id, qty, exec_price, time)
            }
            TradeState::Closed => {
                // A closed trade's confirmed book is always empty: the
                // execute lookup fails before reaching here.
                unreachable!("execution applied to a closed trade")
            }
        }
    }

    /// Same-direction fill: grow the position and refresh the entry average.
    fn add_to_position(&mut self, qty: u64, exec_price: Decimal) {
        let fill = Decimal::from(qty);
        self.qty += qty;
        let total = Decimal::from(self.qty);
        self.open_value += fill * exec_price;
        self.open_price = Some(self.open_value / total);
        self.market_value = total * exec_price;
        self.open_pnl = self.direction_sign() * (self.market_value - self.open_value);
    }

    /// Opposite-direction fill: realize P&L on the covered quantity, and
    /// close (and possibly flip) when the cover reaches the open quantity.
    fn cover_position(
        &mut self,
        order_id: &str,
        qty: u64,
        exec_price: Decimal,
        time: DateTime<Utc>,
    ) -> Option<Self> {
        let entry = match self.open_price {
            Some(price) => price,
            None => panic!("open position without an entry price"),
        };
        let sign = self.direction_sign();
        let flipped_state = match self.state {
            TradeState::Long => TradeState::Short,
            _ => TradeState::Long,
        };

        if qty < self.qty {
            // Partial cover.
            let fill = Decimal::from(qty);
            self.qty -= qty;
            let remaining = Decimal::from(self.qty);
            self.closed_pnl += sign * (exec_price - entry) * fill;
            self.open_value = entry * remaining;
            self.market_value = remaining * exec_price;
            self.open_pnl = sign * (self.market_value - self.open_value);
            return None;
        }

        // Full cover; realize the whole open quantity.
        let covered = Decimal::from(self.qty);
        let excess = qty - self.qty;
        self.closed_pnl += sign * (exec_price - entry) * covered;
        self.qty = 0;
        self.open_value = Decimal::ZERO;
        self.market_value = Decimal::ZERO;
        self.open_pnl = Decimal::ZERO;
        self.state = TradeState::Closed;
        self.close_time = Some(time);

        let new_orders = mem::take(&mut self.new_orders);
        let confirmed_orders = mem::take(&mut self.confirmed_orders);

        if excess == 0 {
            let mut successor = Self::new_flat(Arc::clone(&self.instrument));
            successor.new_orders = new_orders;
            successor.confirmed_orders = confirmed_orders;
            successor.rebuild_order_ids();
            Some(successor)
        } else {
            Some(Self::new_flipped(
                Arc::clone(&self.instrument),
                order_id.to_string(),
                flipped_state,
                excess,
                exec_price,
                time,
                new_orders,
                confirmed_orders,
            ))
        }
    }

    /// Mark the open position to `market_price` and append a P&L snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error for flat and closed trades.
    pub fn update_pnl(
        &mut self,
        market_price: Decimal,
        time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !matches!(self.state, TradeState::Long | TradeState::Short) {
            return Err(EngineError::trade_operation(
                "update_pnl",
                "",
                format!("cannot update P&L for a {} trade", self.state),
            ));
        }

        self.market_value = market_price * Decimal::from(self.qty);
        self.open_pnl = self.direction_sign() * (self.market_value - self.open_value);
        self.returns.push(TradeReturn {
            open_pnl: self.open_pnl,
            closed_pnl: self.closed_pnl,
            time,
        });
        Ok(())
    }

    /// +1 for long, -1 for short.
    fn direction_sign(&self) -> Decimal {
        if self.state == TradeState::Short {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        }
    }

    /// Rebuild the id witness from the five books; used after inheriting
    /// books from a predecessor trade.
    fn rebuild_order_ids(&mut self) {
        self.all_order_ids = self
            .new_orders
            .keys()
            .chain(self.confirmed_orders.keys())
            .chain(self.filled_orders.keys())
            .chain(self.cancelled_orders.keys())
            .chain(self.rejected_orders.keys())
            .cloned()
            .collect();
    }
}
