//! Order-book oracle for the fxmm quoting engine.
//!
//! Maintains one depth ladder per tracked book and answers the two
//! questions the pricing engine asks on every update: "what is the
//! best price" and "what is the depth-weighted average price over a
//! target quantity, per band".

pub mod book;
pub mod error;

pub use book::{BookLevel, BookSet, OrderBook, VwapParams};
pub use error::{FeedError, FeedResult};
