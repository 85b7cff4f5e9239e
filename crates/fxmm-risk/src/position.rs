//! RiskManager: per-instrument position tracking and valuation.
//!
//! Positions are tracked separately for the passive (quoting) leg and the
//! aggressive (covering) leg of each instrument. The net across both legs
//! drives inventory skew and covering decisions. Valuators translate
//! secondary-pair exposure into the valuation currency using either a live
//! cross book or a fixed fallback rate.

use rust_decimal::Decimal;
use tracing::{info, warn};

use fxmm_core::{BookId, InstrKey, InstrMap, Pair, Qty, Side, Tenor};
use fxmm_feed::BookSet;

use crate::error::{RiskError, RiskResult};

// ============================================================================
// RiskMode / Leg / ValuationSource
// ============================================================================

/// Risk manager operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskMode {
    /// Normal operation: quoting and covering allowed.
    Normal,
    /// Safe mode: reduce exposure only. Triggers a stop upstream.
    Safe,
}

/// Which leg of an instrument a fill belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Passive quotes on the quoting venue.
    Passive,
    /// Aggressive covering orders on the hedge venue.
    Aggressive,
}

impl Leg {
    fn idx(self) -> usize {
        match self {
            Self::Passive => 0,
            Self::Aggressive => 1,
        }
    }
}

/// Where the valuation rate for a tenor comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuationSource {
    /// Mid price of a live cross book.
    Book(BookId),
    /// Fixed rate from configuration.
    Fixed(Decimal),
}

// ============================================================================
// RiskManager
// ============================================================================

/// Tracks signed positions per instrument and leg, plus valuation sources.
///
/// Not started until the connectivity gate fires; fills arriving earlier
/// are still recorded, but mode queries report the manager as not running.
pub struct RiskManager {
    mode: RiskMode,
    started: bool,
    /// Signed position per instrument, indexed by leg.
    positions: InstrMap<[Qty; 2]>,
    /// Valuation source per tenor, installed at gate activation.
    valuators: [Option<ValuationSource>; 2],
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: RiskMode::Normal,
            started: false,
            positions: InstrMap::filled([Qty::ZERO; 2]),
            valuators: [None, None],
        }
    }

    /// Start the manager in the given mode. Called once by the gate.
    pub fn start(&mut self, mode: RiskMode) {
        self.started = true;
        self.mode = mode;
        info!(mode = ?mode, "Risk manager started");
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn mode(&self) -> RiskMode {
        self.mode
    }

    /// Switch operating mode. Safe mode is reported upstream via
    /// `eval_stop_conds`, not acted on here.
    pub fn set_mode(&mut self, mode: RiskMode) {
        if mode != self.mode {
            warn!(from = ?self.mode, to = ?mode, "Risk mode changed");
            self.mode = mode;
        }
    }

    /// Install a valuation source for a tenor.
    pub fn install_valuator(&mut self, tenor: Tenor, source: ValuationSource) {
        info!(tenor = %tenor, source = ?source, "Valuator installed");
        self.valuators[tenor.idx()] = Some(source);
    }

    #[must_use]
    pub fn has_valuator(&self, tenor: Tenor) -> bool {
        self.valuators[tenor.idx()].is_some()
    }

    /// Current valuation rate for a tenor.
    ///
    /// A book-backed source returns the cross book mid and fails while
    /// the book is not ready. A fixed source always resolves.
    pub fn valuation_rate(&self, tenor: Tenor, books: &BookSet) -> RiskResult<Decimal> {
        let source = self.valuators[tenor.idx()]
            .as_ref()
            .ok_or(RiskError::NoValuationSource(tenor))?;
        match source {
            ValuationSource::Fixed(rate) => Ok(*rate),
            ValuationSource::Book(book_id) => {
                let book = books.get(*book_id);
                let (bid, ask) = book
                    .best_bid()
                    .zip(book.best_ask())
                    .ok_or(RiskError::CrossBookNotReady(tenor))?;
                Ok((bid.inner() + ask.inner()) / Decimal::TWO)
            }
        }
    }

    /// Record a fill. Buys add to the position, sells subtract.
    pub fn on_fill(&mut self, instr: InstrKey, leg: Leg, side: Side, qty: Qty) {
        let signed = Qty::new(qty.inner() * Decimal::from(side.sign()));
        let pos = &mut self.positions[instr][leg.idx()];
        *pos = Qty::new(pos.inner() + signed.inner());
    }

    /// Net position across both legs of an instrument.
    #[must_use]
    pub fn net_position(&self, instr: InstrKey) -> Qty {
        let [passive, aggressive] = self.positions[instr];
        Qty::new(passive.inner() + aggressive.inner())
    }

    /// Position on a single leg.
    #[must_use]
    pub fn leg_position(&self, instr: InstrKey, leg: Leg) -> Qty {
        self.positions[instr][leg.idx()]
    }

    /// Log every non-flat position, valued into the primary currency
    /// where a rate resolves. Used on shutdown and on repeated operator
    /// signals.
    pub fn log_positions(&self, books: &BookSet) {
        for instr in InstrKey::ALL {
            let net = self.net_position(instr);
            if net.inner().is_zero() {
                continue;
            }
            let valued = match instr.pair {
                Pair::Primary => Ok(net.inner()),
                Pair::Secondary => self
                    .valuation_rate(instr.tenor, books)
                    .map(|rate| net.inner() * rate),
            };
            match valued {
                Ok(v) => info!(
                    instr = %instr,
                    passive = %self.leg_position(instr, Leg::Passive),
                    aggressive = %self.leg_position(instr, Leg::Aggressive),
                    net = %net,
                    valued = %v,
                    "Open position"
                ),
                Err(e) => warn!(
                    instr = %instr,
                    passive = %self.leg_position(instr, Leg::Passive),
                    aggressive = %self.leg_position(instr, Leg::Aggressive),
                    net = %net,
                    error = %e,
                    "Open position, valuation unavailable"
                ),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fxmm_core::{Pair, Price};
    use fxmm_feed::BookLevel;
    use rust_decimal_macros::dec;

    fn instr() -> InstrKey {
        InstrKey::new(Tenor::Near, Pair::Primary)
    }

    #[test]
    fn test_fills_net_across_legs() {
        let mut rm = RiskManager::new();
        rm.start(RiskMode::Normal);

        rm.on_fill(instr(), Leg::Passive, Side::Bid, Qty::new(dec!(3_000_000)));
        rm.on_fill(
            instr(),
            Leg::Aggressive,
            Side::Ask,
            Qty::new(dec!(1_000_000)),
        );

        assert_eq!(
            rm.leg_position(instr(), Leg::Passive).inner(),
            dec!(3_000_000)
        );
        assert_eq!(
            rm.leg_position(instr(), Leg::Aggressive).inner(),
            dec!(-1_000_000)
        );
        assert_eq!(rm.net_position(instr()).inner(), dec!(2_000_000));
    }

    #[test]
    fn test_fixed_valuator_always_resolves() {
        let mut rm = RiskManager::new();
        let books = BookSet::new();
        rm.install_valuator(Tenor::Near, ValuationSource::Fixed(dec!(1.25)));

        assert_eq!(rm.valuation_rate(Tenor::Near, &books), Ok(dec!(1.25)));
        assert_eq!(
            rm.valuation_rate(Tenor::Far, &books),
            Err(RiskError::NoValuationSource(Tenor::Far))
        );
    }

    #[test]
    fn test_book_valuator_uses_mid() {
        let mut rm = RiskManager::new();
        let mut books = BookSet::new();
        rm.install_valuator(Tenor::Near, ValuationSource::Book(BookId::Cross(Tenor::Near)));

        // Not ready yet.
        assert_eq!(
            rm.valuation_rate(Tenor::Near, &books),
            Err(RiskError::CrossBookNotReady(Tenor::Near))
        );

        books.get_mut(BookId::Cross(Tenor::Near)).apply_snapshot(
            vec![BookLevel::new(Price::new(dec!(1.20)), Qty::new(dec!(1_000_000)))],
            vec![BookLevel::new(Price::new(dec!(1.22)), Qty::new(dec!(1_000_000)))],
        );
        assert_eq!(rm.valuation_rate(Tenor::Near, &books), Ok(dec!(1.21)));
    }

    #[test]
    fn test_mode_transitions() {
        let mut rm = RiskManager::new();
        assert!(!rm.is_started());

        rm.start(RiskMode::Normal);
        assert!(rm.is_started());
        assert_eq!(rm.mode(), RiskMode::Normal);

        rm.set_mode(RiskMode::Safe);
        assert_eq!(rm.mode(), RiskMode::Safe);
    }
}
