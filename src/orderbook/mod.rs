//! Order book: one central limit order book per trading pair.
//!
//! ## Components
//!
//! - [`OrderNode`]: a resting `Order` plus its linked-list pointers
//! - [`PriceLevel`]: FIFO queue of orders at one price
//! - [`OrderBook`]: bid/ask sides, matching, cancel and reporting views
//!
//! ## Complexity
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | Rest order | O(log n) |
//! | Cancel by id | O(log n) |
//! | Best bid/ask | O(log n) |
//! | Match | O(k log n) for k fills |

pub mod book;
pub mod level;
pub mod node;

pub use book::{LevelSummary, OrderBook, Submission};
pub use level::PriceLevel;
pub use node::OrderNode;
