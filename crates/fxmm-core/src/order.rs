//! In-flight order records and the handle arena.
//!
//! The lifecycle controller never holds references into the arena
//! across events; it passes `OrderHandle`s around and looks records up
//! on demand. Handles are generational, so a handle kept past the
//! record's removal resolves to `None` instead of aliasing a reused
//! slot.

use crate::keys::{InstrKey, Side};
use crate::px::{Price, Qty};
use std::fmt;

/// Stable handle into an [`OrderStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderHandle {
    idx: u32,
    gen: u32,
}

impl fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}g{}", self.idx, self.gen)
    }
}

/// Kind of the request a venue error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqKind {
    New,
    Modify,
    Cancel,
}

impl fmt::Display for ReqKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReqKind::New => write!(f, "New"),
            ReqKind::Modify => write!(f, "Modify"),
            ReqKind::Cancel => write!(f, "Cancel"),
        }
    }
}

/// Self-reported origin of an order.
///
/// Installed at submission time and checked against the table location
/// on every lifecycle event; a mismatch is a fatal invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderOrigin {
    pub instr: InstrKey,
    /// Quote band, `None` for covering orders.
    pub band: Option<usize>,
    /// Pegged covering order (quotes and market covers are not pegged).
    pub pegged: bool,
}

impl OrderOrigin {
    #[inline]
    pub fn quote(instr: InstrKey, band: usize) -> Self {
        Self {
            instr,
            band: Some(band),
            pegged: false,
        }
    }

    #[inline]
    pub fn cover(instr: InstrKey, pegged: bool) -> Self {
        Self {
            instr,
            band: None,
            pegged,
        }
    }

    #[inline]
    pub fn is_quote(&self) -> bool {
        self.band.is_some()
    }
}

/// Observable state of one in-flight order.
///
/// The venue owns the wire-level identity and status transitions; this
/// record mirrors what the callbacks have reported so far.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    /// Venue-assigned order id.
    pub venue_id: u64,
    pub side: Side,
    pub origin: OrderOrigin,
    /// Last submitted price (`None` for market covering orders).
    pub px: Option<Price>,
    /// Last submitted quantity (absolute).
    pub qty: Qty,
    /// Remaining unfilled quantity (absolute).
    pub leaves_qty: Qty,
    /// Terminal: fully filled, cancelled or rejected.
    pub is_inactive: bool,
    /// Number of outstanding cancel requests.
    pub cxl_pending: u32,
}

impl OrderRecord {
    pub fn new(venue_id: u64, side: Side, origin: OrderOrigin, px: Option<Price>, qty: Qty) -> Self {
        Self {
            venue_id,
            side,
            origin,
            px,
            qty,
            leaves_qty: qty,
            is_inactive: false,
            cxl_pending: 0,
        }
    }

    #[inline]
    pub fn is_cxl_pending(&self) -> bool {
        self.cxl_pending > 0
    }
}

/// Generational arena of order records.
#[derive(Debug, Default)]
pub struct OrderStore {
    cells: Vec<Cell>,
    free: Vec<u32>,
    live: usize,
}

#[derive(Debug)]
struct Cell {
    gen: u32,
    rec: Option<OrderRecord>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn insert(&mut self, rec: OrderRecord) -> OrderHandle {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            let cell = &mut self.cells[idx as usize];
            cell.rec = Some(rec);
            OrderHandle { idx, gen: cell.gen }
        } else {
            let idx = self.cells.len() as u32;
            self.cells.push(Cell { gen: 0, rec: Some(rec) });
            OrderHandle { idx, gen: 0 }
        }
    }

    pub fn get(&self, h: OrderHandle) -> Option<&OrderRecord> {
        self.cells
            .get(h.idx as usize)
            .filter(|c| c.gen == h.gen)
            .and_then(|c| c.rec.as_ref())
    }

    pub fn get_mut(&mut self, h: OrderHandle) -> Option<&mut OrderRecord> {
        self.cells
            .get_mut(h.idx as usize)
            .filter(|c| c.gen == h.gen)
            .and_then(|c| c.rec.as_mut())
    }

    /// Remove a record, invalidating all copies of its handle.
    pub fn remove(&mut self, h: OrderHandle) -> Option<OrderRecord> {
        let cell = self.cells.get_mut(h.idx as usize)?;
        if cell.gen != h.gen || cell.rec.is_none() {
            return None;
        }
        let rec = cell.rec.take();
        cell.gen = cell.gen.wrapping_add(1);
        self.free.push(h.idx);
        self.live -= 1;
        rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Pair, Tenor};
    use rust_decimal_macros::dec;

    fn sample_record(venue_id: u64) -> OrderRecord {
        OrderRecord::new(
            venue_id,
            Side::Bid,
            OrderOrigin::quote(InstrKey::new(Tenor::Near, Pair::Primary), 0),
            Some(Price::new(dec!(1.0998))),
            Qty::new(dec!(1000)),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let mut store = OrderStore::new();
        let h = store.insert(sample_record(1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(h).map(|r| r.venue_id), Some(1));

        let removed = store.remove(h);
        assert_eq!(removed.map(|r| r.venue_id), Some(1));
        assert!(store.is_empty());
        assert!(store.get(h).is_none());
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut store = OrderStore::new();
        let h1 = store.insert(sample_record(1));
        store.remove(h1);

        // Slot is reused; the old handle must not resolve to it.
        let h2 = store.insert(sample_record(2));
        assert!(store.get(h1).is_none());
        assert!(store.remove(h1).is_none());
        assert_eq!(store.get(h2).map(|r| r.venue_id), Some(2));
    }

    #[test]
    fn test_get_mut_updates_record() {
        let mut store = OrderStore::new();
        let h = store.insert(sample_record(7));
        if let Some(rec) = store.get_mut(h) {
            rec.cxl_pending += 1;
        }
        assert!(store.get(h).map(|r| r.is_cxl_pending()).unwrap_or(false));
    }
}
