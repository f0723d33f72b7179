//! The engine: one shared entry point for every command and query.
//!
//! ## Design Principles
//!
//! 1. **Explicit ownership**: the engine owns the instrument registry, the
//!    ledger and every market. Callers share it through `Arc<Engine>`; there is
//!    no global state.
//! 2. **Narrow locks**: BUY/SELL/CANCEL lock one market; DEPOSIT, WITHDRAW and
//!    BALANCES touch one account in the ledger. Unrelated pairs never contend.
//! 3. **Lock order**: market, then ledger gate, then accounts in ascending id.
//!    [`Engine::audit`] takes every market (in index order) before the gate.
//!
//! ## Example
//!
//! ```
//! use exchange_core::engine::{Engine, EngineConfig};
//! use exchange_core::types::Quantity;
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let alice = engine.new_account();
//! let bob = engine.new_account();
//!
//! engine.deposit(alice, "USD", "1000").unwrap();
//! engine.deposit(bob, "BTC", "10").unwrap();
//! engine.buy(alice, "BTC/USD", "100", "5").unwrap();
//! let sell = engine.sell(bob, "BTC/USD", "100", "5").unwrap();
//!
//! assert_eq!(sell.trades.len(), 1);
//! let rows = engine.balances(alice);
//! assert_eq!(rows[1].instrument, "USD");
//! assert_eq!(rows[1].available, Quantity::from(500u64));
//! ```

pub mod config;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::MutexGuard;
use serde::Serialize;
use tracing::{debug, info};

pub use config::{DemoConfig, EngineConfig, InstrumentConfig};

use crate::balance_sheet::{AuditReport, BalanceSheet};
use crate::error::{Error, Result};
use crate::ledger::{BalanceRow, Ledger};
use crate::market::{Market, OrderDirectory};
use crate::orderbook::{OrderBook, Submission};
use crate::types::{
    AccountId, InstrumentId, InstrumentRegistry, MarketId, Order, OrderId, Quantity, RawQuantity,
    Side,
};

// ============================================================================
// Commands and Queries
// ============================================================================

/// A state-changing request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Deposit {
        instrument: String,
        amount: RawQuantity,
    },
    Withdraw {
        instrument: String,
        amount: RawQuantity,
    },
    Buy {
        market: String,
        price: RawQuantity,
        quantity: RawQuantity,
    },
    Sell {
        market: String,
        price: RawQuantity,
        quantity: RawQuantity,
    },
    Cancel {
        order_id: OrderId,
    },
}

/// What a successful [`Command`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Deposited {
        instrument: InstrumentId,
        amount: Quantity,
    },
    Withdrawn {
        instrument: InstrumentId,
        amount: Quantity,
    },
    /// BUY or SELL; the order may already be filled
    Placed(Submission),
    Cancelled(Order),
}

impl Execution {
    /// The order a BUY, SELL or CANCEL acted on.
    pub fn order(&self) -> Option<&Order> {
        match self {
            Execution::Placed(submission) => Some(&submission.order),
            Execution::Cancelled(order) => Some(order),
            _ => None,
        }
    }
}

/// A read-only request about one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Balances,
    OpenOrders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryResult {
    /// One row per registered instrument
    Balances(Vec<BalanceRow>),
    /// OPEN and PARTIALLY_FILLED orders, ascending by id
    OpenOrders(Vec<Order>),
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug)]
pub struct Engine {
    registry: InstrumentRegistry,
    ledger: Ledger,
    markets: Vec<Market>,
    market_index: HashMap<String, MarketId>,
    next_account: AtomicU64,
    orders: Arc<OrderDirectory>,
}

impl Engine {
    /// Register the configured instruments and open their markets.
    ///
    /// # Errors
    ///
    /// `Config` for bad instruments, malformed or unknown pairs, or a market
    /// listed twice.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut registry = InstrumentRegistry::new();
        for instrument in &config.instruments {
            registry.register(&instrument.symbol, instrument.kind, instrument.scale)?;
        }

        let ledger = Ledger::new(&registry);
        let orders = Arc::new(OrderDirectory::new());
        let mut markets = Vec::new();
        let mut market_index = HashMap::new();

        for symbol in config.market_symbols() {
            let id = MarketId(markets.len() as u32);
            let market = Market::new(id, &symbol, &registry, Arc::clone(&orders))?;
            if market_index
                .insert(market.symbol().to_string(), id)
                .is_some()
            {
                return Err(Error::Config(format!("market {symbol} listed twice")));
            }
            markets.push(market);
        }

        info!(
            instruments = registry.len(),
            markets = markets.len(),
            "engine ready"
        );
        Ok(Self {
            registry,
            ledger,
            markets,
            market_index,
            next_account: AtomicU64::new(1),
            orders,
        })
    }

    /// Allocate a fresh account id.
    pub fn new_account(&self) -> AccountId {
        AccountId(self.next_account.fetch_add(1, Ordering::Relaxed))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    pub fn execute(&self, account: AccountId, command: Command) -> Result<Execution> {
        match command {
            Command::Deposit { instrument, amount } => {
                let (instrument, amount) = self.deposit(account, &instrument, amount)?;
                Ok(Execution::Deposited { instrument, amount })
            }
            Command::Withdraw { instrument, amount } => {
                let (instrument, amount) = self.withdraw(account, &instrument, amount)?;
                Ok(Execution::Withdrawn { instrument, amount })
            }
            Command::Buy {
                market,
                price,
                quantity,
            } => self.buy(account, &market, price, quantity).map(Execution::Placed),
            Command::Sell {
                market,
                price,
                quantity,
            } => self.sell(account, &market, price, quantity).map(Execution::Placed),
            Command::Cancel { order_id } => self.cancel(account, order_id).map(Execution::Cancelled),
        }
    }

    pub fn query(&self, account: AccountId, query: Query) -> QueryResult {
        match query {
            Query::Balances => QueryResult::Balances(self.balances(account)),
            Query::OpenOrders => QueryResult::OpenOrders(self.open_orders(account)),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Credit `amount` of `instrument` to `account`.
    pub fn deposit(
        &self,
        account: AccountId,
        instrument: &str,
        amount: impl Into<RawQuantity>,
    ) -> Result<(InstrumentId, Quantity)> {
        let instrument = self.registry.for_type(instrument)?;
        let amount = instrument.convert(amount)?;
        self.ledger.deposit(account, instrument.id, amount)?;
        Ok((instrument.id, amount))
    }

    /// Debit `amount` of `instrument` from `account`'s available balance.
    pub fn withdraw(
        &self,
        account: AccountId,
        instrument: &str,
        amount: impl Into<RawQuantity>,
    ) -> Result<(InstrumentId, Quantity)> {
        let instrument = self.registry.for_type(instrument)?;
        let amount = instrument.convert(amount)?;
        self.ledger.withdraw(account, instrument.id, amount)?;
        Ok((instrument.id, amount))
    }

    pub fn buy(
        &self,
        account: AccountId,
        market: &str,
        price: impl Into<RawQuantity>,
        quantity: impl Into<RawQuantity>,
    ) -> Result<Submission> {
        self.market(market)?
            .place(&self.ledger, account, Side::Buy, price, quantity)
    }

    pub fn sell(
        &self,
        account: AccountId,
        market: &str,
        price: impl Into<RawQuantity>,
        quantity: impl Into<RawQuantity>,
    ) -> Result<Submission> {
        self.market(market)?
            .place(&self.ledger, account, Side::Sell, price, quantity)
    }

    /// Cancel one of `account`'s resting orders. Only the market the order
    /// rests in is locked.
    pub fn cancel(&self, account: AccountId, order_id: OrderId) -> Result<Order> {
        let market = self
            .orders
            .route(order_id)
            .and_then(|id| self.markets.get(id.0 as usize));
        let Some(market) = market else {
            debug!(%account, order = %order_id, "cancel of unknown order");
            return Err(Error::OrderNotFound(order_id));
        };
        market.cancel(&self.ledger, account, order_id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn balances(&self, account: AccountId) -> Vec<BalanceRow> {
        self.ledger.balances(account)
    }

    /// Resting orders of `account` across all markets, ascending by id.
    pub fn open_orders(&self, account: AccountId) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .markets
            .iter()
            .flat_map(|market| market.open_orders(account))
            .collect();
        orders.sort_unstable_by_key(|order| order.id);
        orders
    }

    pub fn market(&self, symbol: &str) -> Result<&Market> {
        self.market_index
            .get(symbol)
            .and_then(|id| self.markets.get(id.0 as usize))
            .ok_or_else(|| Error::UnknownMarket(symbol.to_string()))
    }

    pub fn markets(&self) -> &[Market] {
        &self.markets
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of order ids handed out so far.
    pub fn orders_issued(&self) -> u64 {
        self.orders.issued()
    }

    /// Consistent snapshot of all balances.
    pub fn balance_sheet(&self) -> BalanceSheet {
        BalanceSheet::capture(&self.ledger)
    }

    /// Check conservation and that every reserved balance is exactly what the
    /// account's resting orders hold.
    ///
    /// Freezes all markets for the duration of the check.
    pub fn audit(&self) -> AuditReport {
        let books: Vec<MutexGuard<'_, OrderBook>> = self.markets.iter().map(Market::lock).collect();

        let mut expected: HashMap<(AccountId, InstrumentId), Quantity> = HashMap::new();
        for book in &books {
            for order in book.resting() {
                let instrument = match order.side {
                    Side::Buy => book.quote(),
                    Side::Sell => book.base(),
                };
                let held = order.outstanding_reservation().unwrap_or(Quantity::ZERO);
                let slot = expected.entry((order.account, instrument)).or_default();
                *slot = [*slot, held].into_iter().sum();
            }
        }

        let sheet = BalanceSheet::capture(&self.ledger);
        drop(books);
        sheet.audit(&expected)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            instruments: vec![
                InstrumentConfig::currency("BTC"),
                InstrumentConfig::currency("USD"),
                InstrumentConfig::stock("ACME"),
            ],
            markets: Vec::new(),
        })
        .unwrap()
    }

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn row<'a>(rows: &'a [BalanceRow], symbol: &str) -> &'a BalanceRow {
        rows.iter().find(|r| r.instrument == symbol).unwrap()
    }

    #[test]
    fn test_engine_new_derives_markets() {
        let e = engine();
        let symbols: Vec<&str> = e.markets().iter().map(Market::symbol).collect();
        assert_eq!(symbols, vec!["ACME/BTC", "ACME/USD", "BTC/USD"]);
        assert!(e.market("BTC/USD").is_ok());
        assert!(matches!(e.market("USD/BTC"), Err(Error::UnknownMarket(_))));
    }

    #[test]
    fn test_engine_new_rejects_bad_config() {
        let mut config = EngineConfig::default();
        config.markets.push("BTC/USD".into());
        assert!(matches!(Engine::new(config), Err(Error::Config(_))));

        let config = EngineConfig {
            markets: vec!["BTC/EUR".into()],
            ..EngineConfig::default()
        };
        assert!(matches!(Engine::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_new_account_is_unique() {
        let e = engine();
        let a = e.new_account();
        let b = e.new_account();
        assert_ne!(a, b);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let e = engine();
        let a = e.new_account();
        let b = e.new_account();

        e.execute(
            a,
            Command::Deposit {
                instrument: "USD".into(),
                amount: "1000".into(),
            },
        )
        .unwrap();
        e.execute(
            b,
            Command::Deposit {
                instrument: "BTC".into(),
                amount: "10".into(),
            },
        )
        .unwrap();

        let buy = e
            .execute(
                a,
                Command::Buy {
                    market: "BTC/USD".into(),
                    price: "100".into(),
                    quantity: "5".into(),
                },
            )
            .unwrap();
        assert_eq!(buy.order().unwrap().status, OrderStatus::Open);
        assert_eq!(row(&e.balances(a), "USD").reserved, q("500"));

        let sell = e
            .execute(
                b,
                Command::Sell {
                    market: "BTC/USD".into(),
                    price: "100".into(),
                    quantity: "5".into(),
                },
            )
            .unwrap();
        assert_eq!(sell.order().unwrap().status, OrderStatus::Filled);

        let QueryResult::Balances(rows_a) = e.query(a, Query::Balances) else {
            panic!("expected balances");
        };
        assert_eq!(row(&rows_a, "USD").available, q("500"));
        assert_eq!(row(&rows_a, "USD").reserved, Quantity::ZERO);
        assert_eq!(row(&rows_a, "BTC").available, q("5"));

        let rows_b = e.balances(b);
        assert_eq!(row(&rows_b, "BTC").available, q("5"));
        assert_eq!(row(&rows_b, "BTC").reserved, Quantity::ZERO);
        assert_eq!(row(&rows_b, "USD").available, q("500"));

        assert_eq!(e.query(a, Query::OpenOrders), QueryResult::OpenOrders(vec![]));
        assert!(e.audit().is_clean());
    }

    #[test]
    fn test_deposit_errors() {
        let e = engine();
        let a = e.new_account();
        assert!(matches!(e.deposit(a, "DOGE", "1"), Err(Error::UnknownInstrument(_))));
        assert!(matches!(e.deposit(a, "USD", "lots"), Err(Error::Conversion(_))));
        assert!(matches!(e.deposit(a, "USD", "0"), Err(Error::InvalidAmount(_))));
        // whole shares only: 0.5 truncates to zero
        assert!(matches!(e.deposit(a, "ACME", "0.5"), Err(Error::InvalidAmount(_))));
        assert_eq!(e.deposit(a, "ACME", "2.5").unwrap().1, q("2"));
    }

    #[test]
    fn test_withdraw() {
        let e = engine();
        let a = e.new_account();
        e.deposit(a, "USD", "100").unwrap();
        e.buy(a, "BTC/USD", "10", "6").unwrap();

        // 60 reserved, only 40 available
        assert!(matches!(
            e.withdraw(a, "USD", "41"),
            Err(Error::InsufficientFunds { .. })
        ));
        e.withdraw(a, "USD", "40").unwrap();
        assert_eq!(e.balance_sheet().supply()["USD"], q("60"));
        assert!(e.audit().is_clean());
    }

    #[test]
    fn test_cancel_routes_across_markets() {
        let e = engine();
        let a = e.new_account();
        let b = e.new_account();
        e.deposit(a, "USD", "1000").unwrap();
        e.deposit(a, "BTC", "1").unwrap();

        let first = e.buy(a, "ACME/USD", "10", "3").unwrap().order.id;
        let second = e.sell(a, "BTC/USD", "900", "0.5").unwrap().order.id;

        let open: Vec<OrderId> = e.open_orders(a).iter().map(|o| o.id).collect();
        assert_eq!(open, vec![first, second]);

        assert_eq!(e.cancel(b, second), Err(Error::OrderNotFound(second)));
        let cancelled = e.cancel(a, second).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(row(&e.balances(a), "BTC").available, q("1"));
        assert_eq!(e.cancel(a, second), Err(Error::OrderNotFound(second)));
        assert_eq!(e.cancel(a, OrderId(999)), Err(Error::OrderNotFound(OrderId(999))));
        assert!(e.audit().is_clean());
    }

    #[test]
    fn test_cancel_locks_only_the_owning_market() {
        let e = engine();
        let a = e.new_account();
        e.deposit(a, "USD", "1000").unwrap();
        let order = e.buy(a, "BTC/USD", "100", "1").unwrap().order.id;

        // parking_lot mutexes are not reentrant: touching either held book
        // from this thread would hang
        let _acme_btc = e.market("ACME/BTC").unwrap().lock();
        let _acme_usd = e.market("ACME/USD").unwrap().lock();
        let cancelled = e.cancel(a, order).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(row(&e.balances(a), "USD").available, q("1000"));
    }

    #[test]
    fn test_unfunded_rejections_open_no_account() {
        let e = engine();
        let funded = e.new_account();
        e.deposit(funded, "USD", "10").unwrap();
        assert_eq!(e.balance_sheet().account_count(), 1);

        let ghost = e.new_account();
        assert!(matches!(
            e.buy(ghost, "BTC/USD", "1", "1"),
            Err(Error::InsufficientFunds { .. })
        ));
        assert!(matches!(
            e.sell(ghost, "BTC/USD", "1", "1"),
            Err(Error::InsufficientFunds { .. })
        ));
        assert!(matches!(
            e.withdraw(ghost, "USD", "1"),
            Err(Error::InsufficientFunds { .. })
        ));
        assert_eq!(e.balance_sheet().account_count(), 1);
        assert_eq!(e.ledger().account_count(), 1);
    }

    #[test]
    fn test_unrepresentable_notional_is_not_fatal() {
        let e = engine();
        let a = e.new_account();
        e.deposit(a, "USD", "10000000000000").unwrap();
        let before = e.balances(a);

        // 1e13 - 1e-16 needs 29 significant digits
        let err = e.buy(a, "BTC/USD", "0.00000001", "0.00000001").unwrap_err();
        assert!(matches!(err, Error::InvalidOrder(_)), "{err}");
        assert!(!err.is_fatal());
        assert_eq!(e.balances(a), before);
        assert!(e.open_orders(a).is_empty());
        assert!(e.audit().is_clean());
    }

    #[test]
    fn test_unknown_market() {
        let e = engine();
        let a = e.new_account();
        assert_eq!(
            e.buy(a, "ETH/USD", "1", "1").unwrap_err(),
            Error::UnknownMarket("ETH/USD".into())
        );
    }

    #[test]
    fn test_balances_list_every_instrument() {
        let e = engine();
        let a = e.new_account();
        let rows = e.balances(a);
        let symbols: Vec<&str> = rows.iter().map(|r| r.instrument.as_str()).collect();
        assert_eq!(symbols, vec!["BTC", "USD", "ACME"]);
        assert!(rows.iter().all(|r| r.available.is_zero() && r.reserved.is_zero()));
    }

    #[test]
    fn test_orders_issued() {
        let e = engine();
        let a = e.new_account();
        e.deposit(a, "USD", "100").unwrap();
        e.buy(a, "BTC/USD", "1", "1").unwrap();
        e.buy(a, "ACME/USD", "1", "1").unwrap();
        assert_eq!(e.orders_issued(), 2);
    }
}
