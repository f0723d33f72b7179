//! Order node for slab-based storage.
//!
//! ## Design
//!
//! `OrderNode` wraps a resting `Order` with doubly-linked list pointers so it
//! can be unlinked from its price level in O(1) given its slab key.
//!
//! ## Linked List
//!
//! Orders at the same price level form a doubly-linked list:
//! - `next`: the next (newer) order at this price
//! - `prev`: the previous (older) order at this price
//!
//! Keys are `usize` values handed out by `slab.insert()` and may be reused once
//! the node is removed.

use crate::types::{Order, OrderId, Quantity};

/// Resting order plus its position in the price level queue.
#[derive(Debug, Clone)]
pub struct OrderNode {
    pub order: Order,

    /// Newer neighbour (slab key); `None` at the tail
    pub next: Option<usize>,

    /// Older neighbour (slab key); `None` at the head
    pub prev: Option<usize>,
}

impl OrderNode {
    /// Create a new, unlinked node.
    #[inline]
    pub fn new(order: Order) -> Self {
        Self {
            order,
            next: None,
            prev: None,
        }
    }

    /// Not linked to any neighbour.
    #[inline]
    pub fn is_unlinked(&self) -> bool {
        self.next.is_none() && self.prev.is_none()
    }

    #[inline]
    pub fn order_id(&self) -> OrderId {
        self.order.id
    }

    #[inline]
    pub fn price(&self) -> Quantity {
        self.order.price
    }

    #[inline]
    pub fn remaining(&self) -> Quantity {
        self.order.remaining
    }

    /// Fill a portion of this order, returning the amount actually filled.
    #[inline]
    pub fn fill(&mut self, quantity: Quantity) -> Quantity {
        self.order.fill(quantity)
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.order.is_filled()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, MarketId, Side};

    fn node(id: u64, qty: u64) -> OrderNode {
        OrderNode::new(Order::new(
            OrderId(id),
            AccountId(100),
            MarketId(0),
            Side::Sell,
            Quantity::from(250u64),
            Quantity::from(qty),
            id,
        ))
    }

    #[test]
    fn test_order_node_accessors() {
        let n = node(42, 10);
        assert_eq!(n.order_id(), OrderId(42));
        assert_eq!(n.price(), Quantity::from(250u64));
        assert_eq!(n.remaining(), Quantity::from(10u64));
        assert!(n.is_unlinked());
        assert!(!n.is_filled());
    }

    #[test]
    fn test_order_node_fill() {
        let mut n = node(1, 10);

        assert_eq!(n.fill(Quantity::from(4u64)), Quantity::from(4u64));
        assert_eq!(n.remaining(), Quantity::from(6u64));

        assert_eq!(n.fill(Quantity::from(9u64)), Quantity::from(6u64));
        assert!(n.is_filled());
    }

    #[test]
    fn test_order_node_linking() {
        let mut n = node(1, 10);
        n.next = Some(2);
        assert!(!n.is_unlinked());
        n.next = None;
        n.prev = Some(0);
        assert!(!n.is_unlinked());
    }
}
