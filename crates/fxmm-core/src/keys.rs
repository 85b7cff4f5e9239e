//! Coordinate types for the quoting grid.
//!
//! Every quoted order lives at a `(Tenor, Pair, Side, Band)` coordinate.
//! The coordinate space is small and statically bounded, so per-slot
//! state is kept in enum-indexed fixed arrays (`InstrMap`, `SlotMap`)
//! rather than hash maps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Maximum number of quote bands per side.
pub const MAX_BANDS: usize = 10;

/// Settlement-date bucket of a quoted instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tenor {
    /// Same-day settlement.
    Near,
    /// Next-day settlement.
    Far,
}

impl Tenor {
    pub const ALL: [Tenor; 2] = [Tenor::Near, Tenor::Far];

    #[inline]
    pub fn idx(&self) -> usize {
        match self {
            Tenor::Near => 0,
            Tenor::Far => 1,
        }
    }
}

impl fmt::Display for Tenor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tenor::Near => write!(f, "near"),
            Tenor::Far => write!(f, "far"),
        }
    }
}

/// One of the two quoted currency pairs.
///
/// Both pairs share a common quote currency; their cross is tracked
/// for valuation only (see [`BookId::Cross`]) and is never quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pair {
    Primary,
    Secondary,
}

impl Pair {
    pub const ALL: [Pair; 2] = [Pair::Primary, Pair::Secondary];

    #[inline]
    pub fn idx(&self) -> usize {
        match self {
            Pair::Primary => 0,
            Pair::Secondary => 1,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pair::Primary => write!(f, "primary"),
            Pair::Secondary => write!(f, "secondary"),
        }
    }
}

/// Quoting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Bid, Side::Ask];

    #[inline]
    pub fn idx(&self) -> usize {
        match self {
            Side::Bid => 0,
            Side::Ask => 1,
        }
    }

    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Position sign of a fill on this side: buying is +1, selling -1.
    #[inline]
    pub fn sign(&self) -> i32 {
        match self {
            Side::Bid => 1,
            Side::Ask => -1,
        }
    }

    #[inline]
    pub fn is_bid(&self) -> bool {
        matches!(self, Side::Bid)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// A quoted instrument: one pair at one tenor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrKey {
    pub tenor: Tenor,
    pub pair: Pair,
}

impl InstrKey {
    pub const ALL: [InstrKey; 4] = [
        InstrKey::new(Tenor::Near, Pair::Primary),
        InstrKey::new(Tenor::Near, Pair::Secondary),
        InstrKey::new(Tenor::Far, Pair::Primary),
        InstrKey::new(Tenor::Far, Pair::Secondary),
    ];

    #[inline]
    pub const fn new(tenor: Tenor, pair: Pair) -> Self {
        Self { tenor, pair }
    }
}

impl fmt::Display for InstrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pair, self.tenor)
    }
}

/// One rung of the quoting grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub instr: InstrKey,
    pub side: Side,
    pub band: usize,
}

impl SlotKey {
    #[inline]
    pub fn new(instr: InstrKey, side: Side, band: usize) -> Self {
        debug_assert!(band < MAX_BANDS);
        Self { instr, side, band }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.instr, self.side, self.band)
    }
}

/// Identifies an order book tracked by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookId {
    /// Book of a quoted instrument.
    Quoted(InstrKey),
    /// Book of the cross pair at a tenor; used for valuation only.
    Cross(Tenor),
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookId::Quoted(instr) => write!(f, "{instr}"),
            BookId::Cross(tenor) => write!(f, "cross/{tenor}"),
        }
    }
}

/// Logical connectors whose availability gates steady-state operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorId {
    /// Market-data connector (feeds all books).
    MarketData,
    /// Order-entry connector of the quoting venue.
    QuoteVenue,
    /// Order-entry connector of the hedging venue.
    HedgeVenue,
}

impl ConnectorId {
    pub const ALL: [ConnectorId; 3] = [
        ConnectorId::MarketData,
        ConnectorId::QuoteVenue,
        ConnectorId::HedgeVenue,
    ];
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorId::MarketData => write!(f, "mdc"),
            ConnectorId::QuoteVenue => write!(f, "omc-quote"),
            ConnectorId::HedgeVenue => write!(f, "omc-hedge"),
        }
    }
}

/// Fixed-size per-instrument storage indexed by `InstrKey`.
#[derive(Debug, Clone)]
pub struct InstrMap<T>([[T; 2]; 2]);

impl<T: Copy> InstrMap<T> {
    #[inline]
    pub fn filled(value: T) -> Self {
        Self([[value; 2]; 2])
    }
}

impl<T: Default> Default for InstrMap<T> {
    fn default() -> Self {
        Self([
            [T::default(), T::default()],
            [T::default(), T::default()],
        ])
    }
}

impl<T> Index<InstrKey> for InstrMap<T> {
    type Output = T;

    #[inline]
    fn index(&self, key: InstrKey) -> &T {
        &self.0[key.tenor.idx()][key.pair.idx()]
    }
}

impl<T> IndexMut<InstrKey> for InstrMap<T> {
    #[inline]
    fn index_mut(&mut self, key: InstrKey) -> &mut T {
        &mut self.0[key.tenor.idx()][key.pair.idx()]
    }
}

/// Fixed-size per-slot storage indexed by `SlotKey`.
///
/// Backed by a `[tenor][pair][side][band]` array; all bounds are static
/// so lookups are branch-free index arithmetic.
#[derive(Debug, Clone)]
pub struct SlotMap<T>([[[[T; MAX_BANDS]; 2]; 2]; 2]);

impl<T: Copy> SlotMap<T> {
    #[inline]
    pub fn filled(value: T) -> Self {
        Self([[[[value; MAX_BANDS]; 2]; 2]; 2])
    }
}

impl<T: Copy + Default> Default for SlotMap<T> {
    fn default() -> Self {
        Self::filled(T::default())
    }
}

impl<T> Index<SlotKey> for SlotMap<T> {
    type Output = T;

    #[inline]
    fn index(&self, key: SlotKey) -> &T {
        &self.0[key.instr.tenor.idx()][key.instr.pair.idx()][key.side.idx()][key.band]
    }
}

impl<T> IndexMut<SlotKey> for SlotMap<T> {
    #[inline]
    fn index_mut(&mut self, key: SlotKey) -> &mut T {
        &mut self.0[key.instr.tenor.idx()][key.instr.pair.idx()][key.side.idx()][key.band]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite_and_sign() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite(), Side::Bid);
        assert_eq!(Side::Bid.sign(), 1);
        assert_eq!(Side::Ask.sign(), -1);
    }

    #[test]
    fn test_instr_map_indexing() {
        let mut map: InstrMap<u32> = InstrMap::filled(0);
        for (i, instr) in InstrKey::ALL.iter().enumerate() {
            map[*instr] = i as u32;
        }
        for (i, instr) in InstrKey::ALL.iter().enumerate() {
            assert_eq!(map[*instr], i as u32);
        }
    }

    #[test]
    fn test_slot_map_distinct_cells() {
        let mut map: SlotMap<Option<u32>> = SlotMap::default();
        let mut n = 0u32;
        for instr in InstrKey::ALL {
            for side in Side::BOTH {
                for band in 0..MAX_BANDS {
                    map[SlotKey::new(instr, side, band)] = Some(n);
                    n += 1;
                }
            }
        }
        let mut m = 0u32;
        for instr in InstrKey::ALL {
            for side in Side::BOTH {
                for band in 0..MAX_BANDS {
                    assert_eq!(map[SlotKey::new(instr, side, band)], Some(m));
                    m += 1;
                }
            }
        }
    }

    #[test]
    fn test_display() {
        let slot = SlotKey::new(InstrKey::new(Tenor::Near, Pair::Primary), Side::Ask, 2);
        assert_eq!(slot.to_string(), "primary/near:ask[2]");
    }
}
