//! Core domain types for the fxmm quoting engine.
//!
//! This crate provides the fundamental types shared by the feed, risk
//! and engine crates:
//! - `Tenor`, `Pair`, `Side`: the coordinate enums of the quoting grid
//! - `InstrKey`, `SlotKey`, `BookId`: composite keys
//! - `InstrMap`, `SlotMap`: enum-indexed fixed-size storage
//! - `Price`, `Qty`: precision-safe numeric newtypes
//! - `OrderStore`: handle arena for in-flight order records

pub mod error;
pub mod keys;
pub mod order;
pub mod px;

pub use error::{CoreError, Result};
pub use keys::{
    BookId, ConnectorId, InstrKey, InstrMap, Pair, Side, SlotKey, SlotMap, Tenor, MAX_BANDS,
};
pub use order::{OrderHandle, OrderOrigin, OrderRecord, OrderStore, ReqKind};
pub use px::{Price, Qty, RoundDir};
