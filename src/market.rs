//! A trading pair and its order book.
//!
//! A market is named `BASE/QUOTE`: prices are quantities of QUOTE per unit of
//! BASE and order sizes are quantities of BASE. The market owns the only lock on
//! its book; every BUY, SELL and CANCEL on the pair runs under it, so operations
//! on one pair are totally ordered while different pairs proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::info;

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::orderbook::{LevelSummary, OrderBook, Submission};
use crate::types::{
    AccountId, Instrument, InstrumentRegistry, MarketId, Order, OrderId, Quantity, RawQuantity,
    Side, Trade,
};

/// Largest combined scale of a pair. A notional carries the decimal places of
/// price and quantity together and must stay exactly representable.
const MAX_PAIR_SCALE: u32 = 28;

/// Order bookkeeping shared by every market of an engine: the id source and
/// the market each resting order lives in.
///
/// Routes are written only while the owning market's book is locked, so an
/// order visible in a book is always routable.
#[derive(Debug)]
pub struct OrderDirectory {
    next_id: AtomicU64,
    routes: RwLock<HashMap<OrderId, MarketId>>,
}

impl Default for OrderDirectory {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            routes: RwLock::new(HashMap::new()),
        }
    }
}

impl OrderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> OrderId {
        OrderId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of order ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    /// Market the resting order `id` lives in.
    pub fn route(&self, id: OrderId) -> Option<MarketId> {
        self.routes.read().get(&id).copied()
    }

    /// Number of routable (resting) orders.
    pub fn resting(&self) -> usize {
        self.routes.read().len()
    }

    /// Route the new order if it rests; drop makers it filled.
    fn record(&self, market: MarketId, submission: &Submission, book: &OrderBook) {
        let mut routes = self.routes.write();
        for trade in &submission.trades {
            let maker = match trade.taker_side {
                Side::Buy => trade.sell_order_id,
                Side::Sell => trade.buy_order_id,
            };
            if !book.contains(maker) {
                routes.remove(&maker);
            }
        }
        if submission.order.is_active() {
            routes.insert(submission.order.id, market);
        }
    }

    fn forget(&self, id: OrderId) {
        self.routes.write().remove(&id);
    }
}

#[derive(Debug)]
pub struct Market {
    id: MarketId,
    symbol: String,
    base: Instrument,
    quote: Instrument,
    book: Mutex<OrderBook>,
    orders: Arc<OrderDirectory>,
}

impl Market {
    /// Create the market for `symbol` (`"BASE/QUOTE"`).
    ///
    /// # Errors
    ///
    /// `Config` for a malformed symbol, unknown or identical instruments, or a
    /// pair whose scales cannot multiply exactly.
    pub fn new(
        id: MarketId,
        symbol: &str,
        registry: &InstrumentRegistry,
        orders: Arc<OrderDirectory>,
    ) -> Result<Self> {
        let (base, quote) = symbol
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("market {symbol:?} is not BASE/QUOTE")))?;
        let lookup = |s: &str| {
            registry
                .for_type(s)
                .cloned()
                .map_err(|_| Error::Config(format!("market {symbol} names unknown instrument {s:?}")))
        };
        let base = lookup(base)?;
        let quote = lookup(quote)?;

        if base.id == quote.id {
            return Err(Error::Config(format!("market {symbol} trades an instrument against itself")));
        }
        if base.quantity.scale() + quote.quantity.scale() > MAX_PAIR_SCALE {
            return Err(Error::Config(format!(
                "market {symbol}: combined scale {} exceeds {MAX_PAIR_SCALE}",
                base.quantity.scale() + quote.quantity.scale()
            )));
        }

        info!(market = id.0, %symbol, base = %base.symbol, quote = %quote.symbol, "market registered");
        Ok(Self {
            id,
            symbol: format!("{}/{}", base.symbol, quote.symbol),
            book: Mutex::new(OrderBook::new(id, base.id, quote.id)),
            base,
            quote,
            orders,
        })
    }

    #[inline]
    pub fn id(&self) -> MarketId {
        self.id
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn base(&self) -> &Instrument {
        &self.base
    }

    #[inline]
    pub fn quote(&self) -> &Instrument {
        &self.quote
    }

    /// Convert a raw price and size and submit a limit order.
    ///
    /// Malformed numbers are rejected as `InvalidOrder`.
    pub fn place(
        &self,
        ledger: &Ledger,
        account: AccountId,
        side: Side,
        price: impl Into<RawQuantity>,
        quantity: impl Into<RawQuantity>,
    ) -> Result<Submission> {
        let price = self
            .quote
            .convert(price)
            .map_err(|e| Error::InvalidOrder(format!("price: {e}")))?;
        let quantity = self
            .base
            .convert(quantity)
            .map_err(|e| Error::InvalidOrder(format!("quantity: {e}")))?;
        self.submit(ledger, account, side, price, quantity)
    }

    /// Submit an order with already converted values.
    pub fn submit(
        &self,
        ledger: &Ledger,
        account: AccountId,
        side: Side,
        price: Quantity,
        quantity: Quantity,
    ) -> Result<Submission> {
        let mut book = self.book.lock();
        let id = self.orders.next_id();
        let submission = book.submit(ledger, id, account, side, price, quantity)?;
        self.orders.record(self.id, &submission, &book);
        Ok(submission)
    }

    /// Cancel an order in this market. `OrderNotFound` if it does not rest here.
    pub fn cancel(&self, ledger: &Ledger, account: AccountId, order_id: OrderId) -> Result<Order> {
        let mut book = self.book.lock();
        let order = book.cancel(ledger, account, order_id)?;
        self.orders.forget(order_id);
        Ok(order)
    }

    /// Exclusive access to the book.
    pub fn lock(&self) -> MutexGuard<'_, OrderBook> {
        self.book.lock()
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Resting asks, best (lowest) first.
    pub fn asks(&self) -> Vec<Order> {
        self.book.lock().asks()
    }

    /// Resting bids, best (highest) first.
    pub fn bids(&self) -> Vec<Order> {
        self.book.lock().bids()
    }

    pub fn depth(&self, side: Side) -> Vec<LevelSummary> {
        self.book.lock().depth(side)
    }

    pub fn open_orders(&self, account: AccountId) -> Vec<Order> {
        self.book.lock().open_orders(account)
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.book.lock().trades().to_vec()
    }

    pub fn state_root(&self) -> [u8; 32] {
        self.book.lock().state_root()
    }
}
