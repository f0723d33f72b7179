//! Price level: the FIFO queue of resting orders at one price.
//!
//! ```text
//! head (oldest) <-> order2 <-> order3 <-> tail (newest)
//! ```
//!
//! New orders are appended at the tail, matching consumes from the head, and
//! any order can be unlinked in O(1) by slab key. Order data lives in the
//! book's slab; this struct only holds queue metadata.

use slab::Slab;

use crate::orderbook::OrderNode;
use crate::types::Quantity;

/// Orders resting at a single price.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Quantity,

    /// Sum of `remaining` over the queue
    pub total_quantity: Quantity,

    /// Oldest order (slab key); matched first
    pub head: Option<usize>,

    /// Newest order (slab key)
    pub tail: Option<usize>,

    pub order_count: usize,
}

impl PriceLevel {
    pub fn new(price: Quantity) -> Self {
        Self {
            price,
            total_quantity: Quantity::ZERO,
            head: None,
            tail: None,
            order_count: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order_count == 0
    }

    /// Append an order at the tail of the queue.
    ///
    /// Unknown keys are ignored.
    pub fn push_back(&mut self, key: usize, slab: &mut Slab<OrderNode>) {
        let Some(node) = slab.get_mut(key) else {
            return;
        };
        let quantity = node.remaining();
        node.prev = self.tail;
        node.next = None;

        match self.tail.and_then(|tail| slab.get_mut(tail)) {
            Some(tail_node) => tail_node.next = Some(key),
            None => self.head = Some(key),
        }

        self.tail = Some(key);
        self.order_count += 1;
        self.total_quantity = self
            .total_quantity
            .checked_add(quantity)
            .unwrap_or(self.total_quantity);
    }

    /// Unlink an order from the queue.
    ///
    /// # Returns
    ///
    /// The removed order's remaining quantity, or `None` for an unknown key
    pub fn remove(&mut self, key: usize, slab: &mut Slab<OrderNode>) -> Option<Quantity> {
        let node = slab.get(key)?;
        let quantity = node.remaining();
        let prev_key = node.prev;
        let next_key = node.next;

        match prev_key.and_then(|prev| slab.get_mut(prev)) {
            Some(prev_node) => prev_node.next = next_key,
            None => self.head = next_key,
        }
        match next_key.and_then(|next| slab.get_mut(next)) {
            Some(next_node) => next_node.prev = prev_key,
            None => self.tail = prev_key,
        }

        if let Some(node) = slab.get_mut(key) {
            node.prev = None;
            node.next = None;
        }

        self.order_count = self.order_count.saturating_sub(1);
        self.reduce_quantity(quantity);
        Some(quantity)
    }

    /// Oldest order's slab key.
    #[inline]
    pub fn peek_head(&self) -> Option<usize> {
        self.head
    }

    /// Account for a partial fill of one of the queued orders.
    pub fn reduce_quantity(&mut self, filled: Quantity) {
        self.total_quantity = self
            .total_quantity
            .checked_sub(filled)
            .filter(|q| !q.is_negative())
            .unwrap_or(Quantity::ZERO);
    }

    /// Slab keys from head to tail.
    pub fn keys<'a>(&self, slab: &'a Slab<OrderNode>) -> LevelIter<'a> {
        LevelIter {
            slab,
            cursor: self.head,
        }
    }
}

/// Walks a level's queue in time priority.
pub struct LevelIter<'a> {
    slab: &'a Slab<OrderNode>,
    cursor: Option<usize>,
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = (usize, &'a OrderNode);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let node = self.slab.get(key)?;
        self.cursor = node.next;
        Some((key, node))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, MarketId, Order, OrderId, Side};

    fn price() -> Quantity {
        Quantity::from(100u64)
    }

    fn insert(slab: &mut Slab<OrderNode>, id: u64, qty: u64) -> usize {
        let order = Order::new(
            OrderId(id),
            AccountId(1),
            MarketId(0),
            Side::Buy,
            price(),
            Quantity::from(qty),
            id,
        );
        slab.insert(OrderNode::new(order))
    }

    fn ids(level: &PriceLevel, slab: &Slab<OrderNode>) -> Vec<u64> {
        level.keys(slab).map(|(_, n)| n.order_id().0).collect()
    }

    #[test]
    fn test_price_level_new() {
        let level = PriceLevel::new(price());
        assert!(level.is_empty());
        assert_eq!(level.total_quantity, Quantity::ZERO);
        assert!(level.peek_head().is_none());
    }

    #[test]
    fn test_price_level_push_multiple() {
        let mut slab = Slab::with_capacity(10);
        let mut level = PriceLevel::new(price());

        let k1 = insert(&mut slab, 1, 1);
        let k2 = insert(&mut slab, 2, 2);
        let k3 = insert(&mut slab, 3, 3);
        level.push_back(k1, &mut slab);
        level.push_back(k2, &mut slab);
        level.push_back(k3, &mut slab);

        assert_eq!(level.order_count, 3);
        assert_eq!(level.total_quantity, Quantity::from(6u64));
        assert_eq!(level.head, Some(k1));
        assert_eq!(level.tail, Some(k3));
        assert_eq!(ids(&level, &slab), vec![1, 2, 3]);

        assert_eq!(slab[k2].prev, Some(k1));
        assert_eq!(slab[k2].next, Some(k3));
    }

    #[test]
    fn test_price_level_remove_middle() {
        let mut slab = Slab::with_capacity(10);
        let mut level = PriceLevel::new(price());
        let keys: Vec<usize> = (1..=3).map(|i| insert(&mut slab, i, i)).collect();
        for &k in &keys {
            level.push_back(k, &mut slab);
        }

        assert_eq!(level.remove(keys[1], &mut slab), Some(Quantity::from(2u64)));
        assert_eq!(level.order_count, 2);
        assert_eq!(level.total_quantity, Quantity::from(4u64));
        assert_eq!(ids(&level, &slab), vec![1, 3]);
        assert!(slab[keys[1]].is_unlinked());
    }

    #[test]
    fn test_price_level_remove_head_and_tail() {
        let mut slab = Slab::with_capacity(10);
        let mut level = PriceLevel::new(price());
        let k1 = insert(&mut slab, 1, 5);
        let k2 = insert(&mut slab, 2, 5);
        level.push_back(k1, &mut slab);
        level.push_back(k2, &mut slab);

        level.remove(k1, &mut slab);
        assert_eq!(level.head, Some(k2));
        assert_eq!(level.tail, Some(k2));

        level.remove(k2, &mut slab);
        assert!(level.is_empty());
        assert!(level.head.is_none());
        assert!(level.tail.is_none());
        assert_eq!(level.total_quantity, Quantity::ZERO);
    }

    #[test]
    fn test_price_level_remove_unknown_key() {
        let mut slab: Slab<OrderNode> = Slab::new();
        let mut level = PriceLevel::new(price());
        assert!(level.remove(7, &mut slab).is_none());
    }

    #[test]
    fn test_price_level_reduce_quantity() {
        let mut level = PriceLevel::new(price());
        level.total_quantity = Quantity::from(10u64);

        level.reduce_quantity(Quantity::from(3u64));
        assert_eq!(level.total_quantity, Quantity::from(7u64));

        // never goes negative
        level.reduce_quantity(Quantity::from(10u64));
        assert_eq!(level.total_quantity, Quantity::ZERO);
    }
}
