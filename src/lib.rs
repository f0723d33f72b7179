//! # Exchange Core
//!
//! Multi-instrument exchange core: a balance ledger, one price-time priority
//! order book per trading pair, and an engine that serves many concurrent
//! callers.
//!
//! ## Architecture
//!
//! - **Types**: quantities, instruments, orders, trades
//! - **Ledger**: available/reserved balances with atomic multi-account postings
//! - **OrderBook**: slab-backed CLOB with plan-then-settle matching
//! - **Market**: one pair, its book and the lock that orders it
//! - **BalanceSheet**: consistent snapshots for reporting and auditing
//! - **Engine**: command/query dispatch over all of the above
//!
//! ## Design Principles
//!
//! 1. **Conservation**: for every instrument, holdings across accounts always
//!    equal deposits minus withdrawals; matching only moves value
//! 2. **Exact arithmetic**: decimal fixed point, no rounding in settlement
//! 3. **Determinism**: the same commands in the same order produce the same
//!    books, trades and balances
//! 4. **All or nothing**: a rejected command leaves no trace

// ============================================================================
// Module declarations
// ============================================================================

/// Crate error taxonomy
pub mod error;

/// Core data types: Quantity, Instrument, Order, Trade
pub mod types;

/// Account balances and postings
pub mod ledger;

/// Order book: CLOB with slab-based storage
pub mod orderbook;

/// Trading pairs
pub mod market;

/// Reporting and audit snapshots
pub mod balance_sheet;

/// Command and query dispatch
pub mod engine;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use balance_sheet::{AuditReport, BalanceSheet, Discrepancy};
pub use engine::{Command, Engine, EngineConfig, Execution, Query, QueryResult};
pub use error::{ConversionError, Error, Result};
pub use ledger::{Balance, BalanceRow, Ledger, Posting};
pub use market::Market;
pub use orderbook::{OrderBook, Submission};
pub use types::{AccountId, Order, OrderId, OrderStatus, Quantity, Side, Trade};
