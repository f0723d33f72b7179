//! Central limit order book for one trading pair.
//!
//! ## Architecture
//!
//! - **Slab**: storage for resting orders, O(1) insert/remove/lookup
//! - **BTreeMap**: sorted price levels for best bid/ask lookup
//! - **HashMap**: order id to slab key, for O(1) cancel
//!
//! Bids are keyed by `Reverse(price)` (best = highest), asks by `price`
//! (best = lowest). Within a level orders queue in arrival order.
//!
//! ## Matching
//!
//! [`OrderBook::submit`] works in three phases:
//!
//! 1. **Plan**: walk the opposite side best-first, FIFO within each level, and
//!    collect the fills the incoming order would take. Nothing is mutated.
//! 2. **Settle**: turn the plan into ledger postings (reservation, both legs of
//!    every trade, the buyer's price-improvement refund) and apply them as one
//!    atomic batch. If the ledger refuses, the call fails with no effect.
//! 3. **Commit**: fill and retire the makers, record trades, rest any remainder.
//!
//! Trades execute at the resting order's price.
//!
//! ## Example
//!
//! ```
//! use exchange_core::ledger::Ledger;
//! use exchange_core::orderbook::OrderBook;
//! use exchange_core::types::*;
//!
//! let mut registry = InstrumentRegistry::new();
//! let btc = registry.register("BTC", InstrumentType::Currency, None).unwrap();
//! let usd = registry.register("USD", InstrumentType::Currency, None).unwrap();
//! let ledger = Ledger::new(&registry);
//! ledger.deposit(AccountId(1), usd, Quantity::from(1000u64)).unwrap();
//! ledger.deposit(AccountId(2), btc, Quantity::from(10u64)).unwrap();
//!
//! let mut book = OrderBook::new(MarketId(0), btc, usd);
//! book.submit(&ledger, OrderId(1), AccountId(1), Side::Buy, Quantity::from(100u64), Quantity::from(5u64))
//!     .unwrap();
//! let fill = book
//!     .submit(&ledger, OrderId(2), AccountId(2), Side::Sell, Quantity::from(100u64), Quantity::from(5u64))
//!     .unwrap();
//!
//! assert_eq!(fill.order.status, OrderStatus::Filled);
//! assert_eq!(fill.trades.len(), 1);
//! assert!(book.is_empty());
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};
use slab::Slab;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::{Ledger, Posting};
use crate::orderbook::{OrderNode, PriceLevel};
use crate::types::{AccountId, InstrumentId, MarketId, Order, OrderId, Quantity, Side, Trade};

/// Result of a BUY/SELL submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The incoming order after matching
    pub order: Order,
    /// Trades it produced, in execution order
    pub trades: Vec<Trade>,
}

/// Aggregate view of one price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub price: Quantity,
    pub quantity: Quantity,
    pub orders: usize,
}

/// A planned fill against one resting order.
#[derive(Debug, Clone, Copy)]
struct Fill {
    key: usize,
    maker_id: OrderId,
    maker_account: AccountId,
    price: Quantity,
    quantity: Quantity,
}

/// Order book for one (base, quote) pair.
#[derive(Debug)]
pub struct OrderBook {
    market: MarketId,
    base: InstrumentId,
    quote: InstrumentId,

    /// Resting orders
    orders: Slab<OrderNode>,

    /// Bid levels, highest price first
    bids: BTreeMap<Reverse<Quantity>, PriceLevel>,

    /// Ask levels, lowest price first
    asks: BTreeMap<Quantity, PriceLevel>,

    /// Order id to slab key
    order_index: HashMap<OrderId, usize>,

    /// Resting order ids per account
    by_account: HashMap<AccountId, BTreeSet<OrderId>>,

    /// Append-only trade log
    trades: Vec<Trade>,

    next_sequence: u64,
    next_trade_sequence: u64,
    bid_count: usize,
    ask_count: usize,
}

impl OrderBook {
    pub fn new(market: MarketId, base: InstrumentId, quote: InstrumentId) -> Self {
        Self::with_capacity(market, base, quote, 0)
    }

    /// Create a book with pre-allocated order storage.
    pub fn with_capacity(
        market: MarketId,
        base: InstrumentId,
        quote: InstrumentId,
        order_capacity: usize,
    ) -> Self {
        Self {
            market,
            base,
            quote,
            orders: Slab::with_capacity(order_capacity),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::with_capacity(order_capacity),
            by_account: HashMap::new(),
            trades: Vec::new(),
            next_sequence: 1,
            next_trade_sequence: 1,
            bid_count: 0,
            ask_count: 0,
        }
    }

    // ========================================================================
    // Capacity and Size
    // ========================================================================

    #[inline]
    pub fn market(&self) -> MarketId {
        self.market
    }

    #[inline]
    pub fn base(&self) -> InstrumentId {
        self.base
    }

    #[inline]
    pub fn quote(&self) -> InstrumentId {
        self.quote
    }

    /// Total number of resting orders
    #[inline]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn bid_count(&self) -> usize {
        self.bid_count
    }

    #[inline]
    pub fn ask_count(&self) -> usize {
        self.ask_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Number of bid price levels
    #[inline]
    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask price levels
    #[inline]
    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// Sequence number the next admitted order will get.
    #[inline]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    // ========================================================================
    // Submit / Cancel
    // ========================================================================

    /// Admit a limit order: reserve, match, rest the remainder.
    ///
    /// # Errors
    ///
    /// - `InvalidOrder` if price or quantity is not positive, or the notional
    ///   or a resulting balance is not exactly representable
    /// - `InsufficientFunds` if the account cannot cover the reservation
    ///
    /// On error neither the book nor the ledger has changed.
    pub fn submit(
        &mut self,
        ledger: &Ledger,
        id: OrderId,
        account: AccountId,
        side: Side,
        price: Quantity,
        quantity: Quantity,
    ) -> Result<Submission> {
        if !price.is_positive() {
            return Err(Error::InvalidOrder(format!("price {price} must be positive")));
        }
        if !quantity.is_positive() {
            return Err(Error::InvalidOrder(format!(
                "quantity {quantity} must be positive"
            )));
        }

        let mut order = Order::new(id, account, self.market, side, price, quantity, self.next_sequence);
        let reservation = order
            .outstanding_reservation()
            .ok_or_else(|| Error::InvalidOrder(format!("notional of {quantity} @ {price} overflows")))?;

        ledger.pre_check(account, self.reserved_instrument(side), reservation)?;

        let fills = self.plan(side, price, quantity);
        let postings = self.postings(&order, reservation, &fills)?;
        ledger.apply(&postings).map_err(|e| match e {
            Error::InvalidAmount(reason) => Error::InvalidOrder(reason),
            other => other,
        })?;

        self.next_sequence += 1;
        let mut trades = Vec::with_capacity(fills.len());
        for fill in &fills {
            self.fill_maker(fill);
            order.fill(fill.quantity);

            let (buy_order_id, sell_order_id, buyer, seller) = match side {
                Side::Buy => (id, fill.maker_id, account, fill.maker_account),
                Side::Sell => (fill.maker_id, id, fill.maker_account, account),
            };
            let trade = Trade {
                sequence: self.next_trade_sequence,
                market: self.market,
                buy_order_id,
                sell_order_id,
                buyer,
                seller,
                price: fill.price,
                quantity: fill.quantity,
                taker_side: side,
            };
            self.next_trade_sequence += 1;
            debug!(
                market = self.market.0,
                trade = trade.sequence,
                buy = %buy_order_id,
                sell = %sell_order_id,
                price = %trade.price,
                quantity = %trade.quantity,
                "trade"
            );
            self.trades.push(trade.clone());
            trades.push(trade);
        }

        if order.is_active() {
            self.add_order(order.clone());
        }
        debug!(
            market = self.market.0,
            order = %id,
            %account,
            %side,
            %price,
            %quantity,
            status = ?order.status,
            "order admitted"
        );

        Ok(Submission { order, trades })
    }

    /// Cancel a resting order owned by `account` and release what it still holds.
    ///
    /// Orders that are absent, already terminal, or owned by someone else all
    /// fail with `OrderNotFound`.
    pub fn cancel(&mut self, ledger: &Ledger, account: AccountId, order_id: OrderId) -> Result<Order> {
        let key = self
            .owned_key(account, order_id)
            .ok_or(Error::OrderNotFound(order_id))?;
        let order = &self.orders[key].order;
        let reservation = order.outstanding_reservation().ok_or_else(|| {
            Error::invariant(format!("{order_id} outstanding reservation overflows"))
        })?;
        let instrument = self.reserved_instrument(order.side);

        ledger.release(account, instrument, reservation)?;

        let mut order = self
            .remove_order(key)
            .ok_or_else(|| Error::invariant(format!("{order_id} vanished during cancel")))?;
        order.cancel();
        debug!(market = self.market.0, order = %order_id, %account, released = %reservation, "order cancelled");
        Ok(order)
    }

    /// Whether `order_id` rests in this book.
    #[inline]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.order_index.contains_key(&order_id)
    }

    /// Resting order by id.
    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let key = self.order_index.get(&order_id)?;
        self.orders.get(*key).map(|node| &node.order)
    }

    // ========================================================================
    // Matching internals
    // ========================================================================

    /// Fills the incoming order would take, best price first, FIFO per level.
    fn plan(&self, side: Side, limit: Quantity, quantity: Quantity) -> Vec<Fill> {
        match side {
            Side::Buy => {
                self.plan_levels(self.asks.values().take_while(move |l| l.price <= limit), quantity)
            }
            Side::Sell => {
                self.plan_levels(self.bids.values().take_while(move |l| l.price >= limit), quantity)
            }
        }
    }

    fn plan_levels<'a>(
        &'a self,
        levels: impl Iterator<Item = &'a PriceLevel>,
        quantity: Quantity,
    ) -> Vec<Fill> {
        let mut fills = Vec::new();
        let mut remaining = quantity;

        'levels: for level in levels {
            for (key, node) in level.keys(&self.orders) {
                if remaining.is_zero() {
                    break 'levels;
                }
                let take = remaining.min(node.remaining());
                fills.push(Fill {
                    key,
                    maker_id: node.order_id(),
                    maker_account: node.order.account,
                    price: level.price,
                    quantity: take,
                });
                remaining = remaining.checked_sub(take).unwrap_or(Quantity::ZERO);
            }
        }
        fills
    }

    fn postings(&self, order: &Order, reservation: Quantity, fills: &[Fill]) -> Result<Vec<Posting>> {
        let overflow = || Error::InvalidOrder(format!("notional of {} overflows", order.id));
        let mut postings = Vec::with_capacity(1 + fills.len() * 3);
        postings.push(Posting::Reserve {
            account: order.account,
            instrument: self.reserved_instrument(order.side),
            amount: reservation,
        });

        for fill in fills {
            let notional = fill.price.checked_mul(fill.quantity).ok_or_else(overflow)?;
            let (buyer, seller) = match order.side {
                Side::Buy => (order.account, fill.maker_account),
                Side::Sell => (fill.maker_account, order.account),
            };
            postings.push(Posting::Transfer {
                from: buyer,
                to: seller,
                instrument: self.quote,
                amount: notional,
            });
            postings.push(Posting::Transfer {
                from: seller,
                to: buyer,
                instrument: self.base,
                amount: fill.quantity,
            });

            // a bid reserved at its own limit; refund the improvement
            if order.side == Side::Buy {
                let held = order.price.checked_mul(fill.quantity).ok_or_else(overflow)?;
                let refund = held.checked_sub(notional).ok_or_else(overflow)?;
                postings.push(Posting::Release {
                    account: order.account,
                    instrument: self.quote,
                    amount: refund,
                });
            }
        }
        Ok(postings)
    }

    fn fill_maker(&mut self, fill: &Fill) {
        let Some(node) = self.orders.get_mut(fill.key) else {
            return;
        };
        let filled = node.fill(fill.quantity);
        let side = node.order.side;
        let done = node.is_filled();

        match side {
            Side::Buy => {
                if let Some(level) = self.bids.get_mut(&Reverse(fill.price)) {
                    level.reduce_quantity(filled);
                }
            }
            Side::Sell => {
                if let Some(level) = self.asks.get_mut(&fill.price) {
                    level.reduce_quantity(filled);
                }
            }
        }
        if done {
            self.remove_order(fill.key);
        }
    }

    fn reserved_instrument(&self, side: Side) -> InstrumentId {
        match side {
            Side::Buy => self.quote,
            Side::Sell => self.base,
        }
    }

    fn owned_key(&self, account: AccountId, order_id: OrderId) -> Option<usize> {
        let key = *self.order_index.get(&order_id)?;
        let node = self.orders.get(key)?;
        (node.order.account == account).then_some(key)
    }

    // ========================================================================
    // Order Management
    // ========================================================================

    /// Rest an order at its price level.
    fn add_order(&mut self, order: Order) -> usize {
        let order_id = order.id;
        let account = order.account;
        let price = order.price;
        let side = order.side;

        let key = self.orders.insert(OrderNode::new(order));
        self.order_index.insert(order_id, key);
        self.by_account.entry(account).or_default().insert(order_id);

        match side {
            Side::Buy => {
                let level = self
                    .bids
                    .entry(Reverse(price))
                    .or_insert_with(|| PriceLevel::new(price));
                level.push_back(key, &mut self.orders);
                self.bid_count += 1;
            }
            Side::Sell => {
                let level = self
                    .asks
                    .entry(price)
                    .or_insert_with(|| PriceLevel::new(price));
                level.push_back(key, &mut self.orders);
                self.ask_count += 1;
            }
        }
        key
    }

    /// Unlink and remove an order by slab key; empty levels are dropped.
    fn remove_order(&mut self, key: usize) -> Option<Order> {
        let node = self.orders.get(key)?;
        let order_id = node.order_id();
        let account = node.order.account;
        let price = node.price();
        let side = node.order.side;

        match side {
            Side::Buy => {
                if let Some(level) = self.bids.get_mut(&Reverse(price)) {
                    level.remove(key, &mut self.orders);
                    self.bid_count = self.bid_count.saturating_sub(1);
                    if level.is_empty() {
                        self.bids.remove(&Reverse(price));
                    }
                }
            }
            Side::Sell => {
                if let Some(level) = self.asks.get_mut(&price) {
                    level.remove(key, &mut self.orders);
                    self.ask_count = self.ask_count.saturating_sub(1);
                    if level.is_empty() {
                        self.asks.remove(&price);
                    }
                }
            }
        }

        self.order_index.remove(&order_id);
        if let Some(ids) = self.by_account.get_mut(&account) {
            ids.remove(&order_id);
            if ids.is_empty() {
                self.by_account.remove(&account);
            }
        }
        Some(self.orders.remove(key).order)
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Highest bid price
    #[inline]
    pub fn best_bid(&self) -> Option<Quantity> {
        self.bids.keys().next().map(|r| r.0)
    }

    /// Lowest ask price
    #[inline]
    pub fn best_ask(&self) -> Option<Quantity> {
        self.asks.keys().next().copied()
    }

    /// `best_ask - best_bid`, `None` unless both sides are populated.
    pub fn spread(&self) -> Option<Quantity> {
        self.best_ask()?.checked_sub(self.best_bid()?)
    }

    /// Resting bids, best first.
    pub fn bids(&self) -> Vec<Order> {
        self.bids
            .values()
            .flat_map(|level| level.keys(&self.orders))
            .map(|(_, node)| node.order.clone())
            .collect()
    }

    /// Resting asks, best first.
    pub fn asks(&self) -> Vec<Order> {
        self.asks
            .values()
            .flat_map(|level| level.keys(&self.orders))
            .map(|(_, node)| node.order.clone())
            .collect()
    }

    /// Aggregated levels of one side, best first.
    pub fn depth(&self, side: Side) -> Vec<LevelSummary> {
        let summary = |level: &PriceLevel| LevelSummary {
            price: level.price,
            quantity: level.total_quantity,
            orders: level.order_count,
        };
        match side {
            Side::Buy => self.bids.values().map(summary).collect(),
            Side::Sell => self.asks.values().map(summary).collect(),
        }
    }

    /// Every trade this book has produced, oldest first.
    #[inline]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// An account's resting orders, ascending by id.
    pub fn open_orders(&self, account: AccountId) -> Vec<Order> {
        self.by_account
            .get(&account)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id).cloned())
            .collect()
    }

    /// All resting orders, in no particular order.
    pub fn resting(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().map(|(_, node)| &node.order)
    }

    /// SHA-256 over the resting book in priority order.
    ///
    /// Two books that received the same command sequence have the same root.
    pub fn state_root(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.market.0.to_be_bytes());

        let sides = [
            (Side::Buy, self.bids.values().collect::<Vec<_>>()),
            (Side::Sell, self.asks.values().collect::<Vec<_>>()),
        ];
        for (side, levels) in sides {
            for level in levels {
                for (_, node) in level.keys(&self.orders) {
                    let order = &node.order;
                    hasher.update([side.to_u8()]);
                    hasher.update(order.id.0.to_be_bytes());
                    hasher.update(order.account.0.to_be_bytes());
                    hasher.update(order.sequence.to_be_bytes());
                    hasher.update(order.price.to_string().as_bytes());
                    hasher.update([0u8]);
                    hasher.update(order.remaining.to_string().as_bytes());
                    hasher.update([0u8]);
                }
            }
        }
        hasher.update(self.next_trade_sequence.to_be_bytes());
        hasher.finalize().into()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
