//! Order-entry seam between the lifecycle controller and the venues.
//!
//! The controller is generic over two implementations of [`OrderEntry`]:
//! the quoting venue and the hedging venue. Submission calls complete
//! synchronously; fills, cancel confirmations and rejects arrive later
//! through the controller's callbacks. Buffered requests are queued and
//! sent together on `flush`, which must be called before control returns
//! to the event loop.

use fxmm_core::{InstrKey, Price, Qty, Side};

use crate::error::EngineResult;

/// Which venue an order lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VenueKind {
    /// Passive quoting venue.
    Quote,
    /// Aggressive hedging venue.
    Hedge,
}

/// A new order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderReq {
    pub instr: InstrKey,
    pub side: Side,
    /// Limit price; `None` submits a market order.
    pub px: Option<Price>,
    /// Absolute quantity.
    pub qty: Qty,
    /// Pegged order, re-priced by the caller on market moves.
    pub pegged: bool,
    /// Queue for the next `flush` instead of sending immediately.
    pub buffered: bool,
}

/// Order-entry interface of one venue.
pub trait OrderEntry {
    /// Submit a new order. Returns the venue-assigned order id.
    fn new_order(&mut self, req: &NewOrderReq) -> EngineResult<u64>;

    /// Replace price and/or quantity of a live order (same identity).
    fn modify_order(
        &mut self,
        id: u64,
        px: Option<Price>,
        qty: Qty,
        buffered: bool,
    ) -> EngineResult<()>;

    /// Request cancellation of a live order.
    fn cancel_order(&mut self, id: u64, buffered: bool) -> EngineResult<()>;

    /// Send all buffered requests, preserving submission order.
    fn flush(&mut self);
}
