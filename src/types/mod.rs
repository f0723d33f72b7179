//! Core data types.
//!
//! - [`Quantity`]: exact fixed-point amount
//! - [`Instrument`], [`InstrumentRegistry`]: what accounts can hold and how raw
//!   input converts to quantities
//! - [`Order`], [`Side`], [`OrderStatus`]: limit orders and their lifecycle
//! - [`Trade`]: an executed fill

mod order;
mod trade;
pub mod instrument;
pub mod quantity;

pub use instrument::{
    Instrument, InstrumentId, InstrumentRegistry, InstrumentType, QuantityKind, RawQuantity,
};
pub use order::{AccountId, MarketId, Order, OrderId, OrderStatus, Side};
pub use quantity::Quantity;
pub use trade::Trade;
