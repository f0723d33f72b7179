//! Order types.
//!
//! Prices are quantities of the pair's quote instrument and sizes are quantities
//! of its base instrument, both as exact [`Quantity`] values.
//!
//! ## Lifecycle
//!
//! ```text
//! OPEN --partial fill--> PARTIALLY_FILLED --fill--> FILLED
//!   \                          |
//!    `--------cancel-----------+--> CANCELLED
//! ```
//!
//! FILLED and CANCELLED are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Quantity;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account-{}", self.0)
    }
}

/// Engine-wide unique, monotonic order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order-{}", self.0)
    }
}

/// Index of a market inside its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u32);

// ============================================================================
// Side / Status
// ============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Bid: pays quote, receives base
    Buy,
    /// Ask: pays base, receives quote
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Byte tag used in state digests
    pub fn to_u8(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

// ============================================================================
// Order
// ============================================================================

/// A limit order.
///
/// ## Example
///
/// ```
/// use exchange_core::types::{AccountId, MarketId, Order, OrderId, OrderStatus, Quantity, Side};
///
/// let mut order = Order::new(
///     OrderId(1),
///     AccountId(7),
///     MarketId(0),
///     Side::Buy,
///     Quantity::from(50u64),   // price
///     Quantity::from(10u64),   // quantity
///     1,                       // sequence
/// );
/// assert_eq!(order.outstanding_reservation(), Some(Quantity::from(500u64)));
///
/// order.fill(Quantity::from(4u64));
/// assert_eq!(order.status, OrderStatus::PartiallyFilled);
/// assert_eq!(order.outstanding_reservation(), Some(Quantity::from(300u64)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    /// Owning account
    pub account: AccountId,

    /// Market the order trades on
    pub market: MarketId,

    pub side: Side,

    /// Limit price, in quote instrument units
    pub price: Quantity,

    /// Original size, in base instrument units
    pub quantity: Quantity,

    /// Unfilled size
    pub remaining: Quantity,

    pub status: OrderStatus,

    /// Book entry sequence; lower means earlier (time priority)
    pub sequence: u64,
}

impl Order {
    pub fn new(
        id: OrderId,
        account: AccountId,
        market: MarketId,
        side: Side,
        price: Quantity,
        quantity: Quantity,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            account,
            market,
            side,
            price,
            quantity,
            remaining: quantity,
            status: OrderStatus::Open,
            sequence,
        }
    }

    /// Check if the order is fully filled
    #[inline]
    pub fn is_filled(&self) -> bool {
        self.remaining.is_zero()
    }

    /// Open or partially filled
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Get the filled quantity
    pub fn filled_quantity(&self) -> Quantity {
        self.quantity
            .checked_sub(self.remaining)
            .unwrap_or(Quantity::ZERO)
    }

    /// Fill a portion of this order.
    ///
    /// Returns the quantity actually filled, capped at `remaining`.
    pub fn fill(&mut self, fill_qty: Quantity) -> Quantity {
        let actual = fill_qty.min(self.remaining);
        if !actual.is_positive() {
            return Quantity::ZERO;
        }
        self.remaining = self
            .remaining
            .checked_sub(actual)
            .unwrap_or(Quantity::ZERO);
        self.status = if self.remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        actual
    }

    /// Mark cancelled. Returns `false` if the order was already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        true
    }

    /// Funds held for `qty` of this order: `price × qty` of quote for a BUY,
    /// `qty` of base for a SELL. `None` on overflow.
    pub fn reservation_for(&self, qty: Quantity) -> Option<Quantity> {
        match self.side {
            Side::Buy => self.price.checked_mul(qty),
            Side::Sell => Some(qty),
        }
    }

    /// Funds still held against the unfilled remainder.
    pub fn outstanding_reservation(&self) -> Option<Quantity> {
        self.reservation_for(self.remaining)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order(side: Side, price: u64, qty: u64) -> Order {
        Order::new(
            OrderId(1),
            AccountId(100),
            MarketId(0),
            side,
            Quantity::from(price),
            Quantity::from(qty),
            1,
        )
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.to_string(), "BUY");
    }

    #[test]
    fn test_order_new() {
        let o = order(Side::Buy, 50, 10);
        assert_eq!(o.remaining, o.quantity);
        assert_eq!(o.status, OrderStatus::Open);
        assert!(o.is_active());
        assert!(!o.is_filled());
        assert_eq!(o.filled_quantity(), Quantity::ZERO);
    }

    #[test]
    fn test_order_fill_transitions() {
        let mut o = order(Side::Sell, 50, 10);

        assert_eq!(o.fill(Quantity::from(3u64)), Quantity::from(3u64));
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining, Quantity::from(7u64));

        assert_eq!(o.fill(Quantity::from(7u64)), Quantity::from(7u64));
        assert_eq!(o.status, OrderStatus::Filled);
        assert!(o.is_filled());
        assert!(!o.is_active());
    }

    #[test]
    fn test_order_overfill_is_capped() {
        let mut o = order(Side::Buy, 50, 10);
        assert_eq!(o.fill(Quantity::from(25u64)), Quantity::from(10u64));
        assert!(o.is_filled());
    }

    #[test]
    fn test_zero_fill_keeps_status() {
        let mut o = order(Side::Buy, 50, 10);
        assert_eq!(o.fill(Quantity::ZERO), Quantity::ZERO);
        assert_eq!(o.status, OrderStatus::Open);
    }

    #[test]
    fn test_cancel_only_from_active() {
        let mut o = order(Side::Buy, 50, 10);
        assert!(o.cancel());
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert!(!o.cancel());

        let mut filled = order(Side::Sell, 50, 1);
        filled.fill(Quantity::from(1u64));
        assert!(!filled.cancel());
        assert_eq!(filled.status, OrderStatus::Filled);
    }

    #[test]
    fn test_reservations() {
        let buy = order(Side::Buy, 50, 10);
        assert_eq!(buy.outstanding_reservation(), Some(Quantity::from(500u64)));

        let sell = order(Side::Sell, 50, 10);
        assert_eq!(sell.outstanding_reservation(), Some(Quantity::from(10u64)));
    }
}
