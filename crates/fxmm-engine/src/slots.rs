//! Slot table and cancel-pending registry.
//!
//! A live order occupies exactly one location: its slot (or the pegged
//! map for pegged covering orders), or the cancel-pending registry once
//! a cancel was submitted for it. The lifecycle controller is the sole
//! writer of both structures.

use fxmm_core::{OrderHandle, SlotKey, SlotMap};

use crate::error::{EngineError, EngineResult};

/// Current location of an order, as determined by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderLocation {
    /// Live in its quote slot.
    Slot(SlotKey),
    /// Live in the pegged covering map.
    Pegged,
    /// Cancel submitted, confirmation outstanding.
    CancelPending,
    /// Not tracked anywhere (already reaped, or a market covering order
    /// with no cancel outstanding).
    Nowhere,
}

/// Which order currently represents the quote at each slot.
#[derive(Debug, Default)]
pub struct OrderSlotTable {
    slots: SlotMap<Option<OrderHandle>>,
}

impl OrderSlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, key: SlotKey) -> Option<OrderHandle> {
        self.slots[key]
    }

    #[inline]
    pub fn set(&mut self, key: SlotKey, occupant: Option<OrderHandle>) {
        self.slots[key] = occupant;
    }

    #[inline]
    pub fn clear(&mut self, key: SlotKey) {
        self.slots[key] = None;
    }

    #[inline]
    pub fn is_empty(&self, key: SlotKey) -> bool {
        self.slots[key].is_none()
    }
}

/// Default registry capacity. Overflow signals a cancel storm or a
/// reconciliation leak and is treated as fatal by the caller.
pub const CANCEL_PENDING_CAP: usize = 512;

/// Bounded set of orders with an outstanding cancel request.
///
/// Shared by quotes and covering orders across all instruments. The
/// set is small and scanned linearly.
#[derive(Debug)]
pub struct CancelPendingRegistry {
    entries: Vec<OrderHandle>,
    cap: usize,
}

impl Default for CancelPendingRegistry {
    fn default() -> Self {
        Self::new(CANCEL_PENDING_CAP)
    }
}

impl CancelPendingRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
        }
    }

    /// Add an order. Fails when the registry is at capacity.
    pub fn add(&mut self, h: OrderHandle) -> EngineResult<()> {
        if self.entries.len() >= self.cap {
            return Err(EngineError::RegistryFull);
        }
        self.entries.push(h);
        Ok(())
    }

    pub fn contains(&self, h: OrderHandle) -> bool {
        self.entries.contains(&h)
    }

    pub fn remove(&mut self, h: OrderHandle) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| *e == h) {
            self.entries.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxmm_core::{InstrKey, OrderOrigin, OrderRecord, OrderStore, Pair, Qty, Side, Tenor};
    use rust_decimal_macros::dec;

    fn handle(store: &mut OrderStore, id: u64) -> OrderHandle {
        store.insert(OrderRecord::new(
            id,
            Side::Bid,
            OrderOrigin::quote(InstrKey::new(Tenor::Near, Pair::Primary), 0),
            None,
            Qty::new(dec!(1000)),
        ))
    }

    #[test]
    fn test_slot_set_get_clear() {
        let mut store = OrderStore::new();
        let h = handle(&mut store, 1);
        let key = SlotKey::new(InstrKey::new(Tenor::Near, Pair::Primary), Side::Bid, 0);

        let mut table = OrderSlotTable::new();
        assert!(table.is_empty(key));

        table.set(key, Some(h));
        assert_eq!(table.get(key), Some(h));

        table.clear(key);
        assert!(table.is_empty(key));
    }

    #[test]
    fn test_registry_add_remove() {
        let mut store = OrderStore::new();
        let h1 = handle(&mut store, 1);
        let h2 = handle(&mut store, 2);

        let mut reg = CancelPendingRegistry::default();
        reg.add(h1).unwrap();
        assert!(reg.contains(h1));
        assert!(!reg.contains(h2));

        assert!(reg.remove(h1));
        assert!(!reg.remove(h1));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_registry_overflow() {
        let mut store = OrderStore::new();
        let mut reg = CancelPendingRegistry::new(2);

        reg.add(handle(&mut store, 1)).unwrap();
        reg.add(handle(&mut store, 2)).unwrap();
        let overflow = reg.add(handle(&mut store, 3));
        assert!(matches!(overflow, Err(EngineError::RegistryFull)));
        assert_eq!(reg.len(), 2);
    }
}
