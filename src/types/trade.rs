//! Trade type representing an executed match between two orders.

use serde::{Deserialize, Serialize};

use crate::types::{AccountId, MarketId, OrderId, Quantity, Side};

/// A single fill between a resting (maker) order and an incoming (taker) order.
///
/// ## Price Discovery
///
/// The trade always executes at the resting order's price. An incoming BUY
/// priced above the best ask pays the ask, not its own limit.
///
/// Trades are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Per-market trade sequence number, starting at 1
    pub sequence: u64,

    pub market: MarketId,

    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,

    pub buyer: AccountId,
    pub seller: AccountId,

    /// Execution price (quote units per base unit)
    pub price: Quantity,

    /// Executed size (base units)
    pub quantity: Quantity,

    /// Side of the incoming order
    pub taker_side: Side,
}

impl Trade {
    /// Quote amount that changed hands: `price × quantity`.
    pub fn notional(&self) -> Option<Quantity> {
        self.price.checked_mul(self.quantity)
    }

    /// Id of the resting order.
    pub fn maker_order_id(&self) -> OrderId {
        match self.taker_side {
            Side::Buy => self.sell_order_id,
            Side::Sell => self.buy_order_id,
        }
    }

    /// Id of the incoming order.
    pub fn taker_order_id(&self) -> OrderId {
        match self.taker_side {
            Side::Buy => self.buy_order_id,
            Side::Sell => self.sell_order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(taker_side: Side) -> Trade {
        Trade {
            sequence: 1,
            market: MarketId(0),
            buy_order_id: OrderId(10),
            sell_order_id: OrderId(20),
            buyer: AccountId(1),
            seller: AccountId(2),
            price: Quantity::parse("100.5").unwrap(),
            quantity: Quantity::parse("2").unwrap(),
            taker_side,
        }
    }

    #[test]
    fn test_trade_notional() {
        assert_eq!(trade(Side::Buy).notional(), Quantity::parse("201"));
    }

    #[test]
    fn test_maker_taker_ids() {
        let t = trade(Side::Buy);
        assert_eq!(t.taker_order_id(), OrderId(10));
        assert_eq!(t.maker_order_id(), OrderId(20));

        let t = trade(Side::Sell);
        assert_eq!(t.taker_order_id(), OrderId(20));
        assert_eq!(t.maker_order_id(), OrderId(10));
    }
}
