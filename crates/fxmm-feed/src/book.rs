//! Depth ladders and per-band VWAP.

use fxmm_core::{BookId, InstrMap, Price, Qty, Side, Tenor};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FeedError, FeedResult};

/// One price level of a depth ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub px: Price,
    pub qty: Qty,
}

impl BookLevel {
    pub fn new(px: Price, qty: Qty) -> Self {
        Self { px, qty }
    }
}

/// Parameters controlling VWAP manipulation reduction.
///
/// Displayed sizes are discounted before weighting so that a single
/// oversized top-of-book level cannot drag the quote ladder around.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VwapParams {
    /// Multiplicative discount in (0, 1]; 1 disables the reduction.
    pub manip_red_coeff: Decimal,
    /// Apply the discount to the top level only, not the whole ladder.
    pub manip_red_only_l1: bool,
}

impl Default for VwapParams {
    fn default() -> Self {
        Self {
            manip_red_coeff: Decimal::ONE,
            manip_red_only_l1: true,
        }
    }
}

/// One side-aware order book.
///
/// Bids are kept in descending price order, asks ascending. The book
/// carries a ready flag (a snapshot has been applied) and an error
/// flag (the feed reported the book unusable); consumers treat an
/// errored book as having no prices.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    ready: bool,
    error: bool,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both ladders from a full snapshot. Clears the error flag.
    pub fn apply_snapshot(&mut self, mut bids: Vec<BookLevel>, mut asks: Vec<BookLevel>) {
        bids.sort_by(|a, b| b.px.cmp(&a.px));
        asks.sort_by(|a, b| a.px.cmp(&b.px));
        self.bids = bids;
        self.asks = asks;
        self.ready = true;
        self.error = false;
    }

    /// Mark the book unusable until the next snapshot.
    pub fn set_error(&mut self) {
        self.error = true;
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready && !self.error
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn best_bid(&self) -> Option<Price> {
        if !self.is_ready() {
            return None;
        }
        self.bids.first().map(|l| l.px)
    }

    pub fn best_ask(&self) -> Option<Price> {
        if !self.is_ready() {
            return None;
        }
        self.asks.first().map(|l| l.px)
    }

    pub fn best(&self, side: Side) -> Option<Price> {
        match side {
            Side::Bid => self.best_bid(),
            Side::Ask => self.best_ask(),
        }
    }

    /// Depth-weighted average price per band over a cumulative walk of
    /// one side's ladder.
    ///
    /// Band `k` averages the slice of liquidity that starts where band
    /// `k-1`'s slice ended and spans `band_qtys[k]`. A band whose slice
    /// cannot be filled yields `None`, as do all deeper bands.
    pub fn vwap(&self, side: Side, band_qtys: &[Qty], params: VwapParams) -> Vec<Option<Price>> {
        let mut out = vec![None; band_qtys.len()];
        if !self.is_ready() {
            return out;
        }
        let levels = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };

        let mut li = 0usize;
        // Remaining discounted quantity at the current level.
        let mut level_rem = Decimal::ZERO;

        let effective = |i: usize, l: &BookLevel| -> Decimal {
            if !params.manip_red_only_l1 || i == 0 {
                l.qty.inner() * params.manip_red_coeff
            } else {
                l.qty.inner()
            }
        };

        if let Some(l) = levels.first() {
            level_rem = effective(0, l);
        }

        for (b, target) in band_qtys.iter().enumerate() {
            let mut need = target.inner();
            if need <= Decimal::ZERO {
                break;
            }
            let mut notional = Decimal::ZERO;

            while need > Decimal::ZERO && li < levels.len() {
                if level_rem.is_zero() {
                    li += 1;
                    match levels.get(li) {
                        Some(l) => level_rem = effective(li, l),
                        None => break,
                    }
                    continue;
                }
                let take = need.min(level_rem);
                notional += take * levels[li].px.inner();
                need -= take;
                level_rem -= take;
            }

            if need > Decimal::ZERO {
                // Ladder exhausted: this band and all deeper bands stay None.
                debug!(side = %side, band = b, "insufficient depth for band");
                break;
            }
            out[b] = Some(Price::new(notional / target.inner()));
        }
        out
    }
}

/// All books tracked by the strategy: the 2x2 quoted books plus one
/// cross book per tenor.
#[derive(Debug, Default)]
pub struct BookSet {
    quoted: InstrMap<OrderBook>,
    cross: [OrderBook; 2],
}

impl BookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: BookId) -> &OrderBook {
        match id {
            BookId::Quoted(instr) => &self.quoted[instr],
            BookId::Cross(tenor) => &self.cross[tenor.idx()],
        }
    }

    pub fn get_mut(&mut self, id: BookId) -> &mut OrderBook {
        match id {
            BookId::Quoted(instr) => &mut self.quoted[instr],
            BookId::Cross(tenor) => &mut self.cross[tenor.idx()],
        }
    }

    /// Validate and apply a snapshot to one book.
    ///
    /// A snapshot carrying a non-positive price or quantity is rejected
    /// whole and puts the book into the error state until the next good
    /// one arrives. Crossed ladders are accepted; the pricing layer
    /// withdraws quotes against a crossed book itself.
    pub fn apply(
        &mut self,
        id: BookId,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    ) -> FeedResult<()> {
        let bad = |l: &BookLevel| !l.px.is_positive() || !l.qty.is_positive();
        if let Some(l) = bids.iter().chain(asks.iter()).find(|l| bad(l)) {
            let reason = format!("non-positive level {}@{}", l.qty, l.px);
            self.get_mut(id).set_error();
            return Err(FeedError::InvalidSnapshot { book: id, reason });
        }
        self.get_mut(id).apply_snapshot(bids, asks);
        Ok(())
    }

    /// True when every book in `required` has a usable snapshot.
    pub fn all_ready(&self, required: &[BookId]) -> bool {
        required.iter().all(|id| self.get(*id).is_ready())
    }

    pub fn cross(&self, tenor: Tenor) -> &OrderBook {
        &self.cross[tenor.idx()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxmm_core::{InstrKey, Pair};
    use rust_decimal_macros::dec;

    fn px(d: Decimal) -> Price {
        Price::new(d)
    }

    fn qty(d: Decimal) -> Qty {
        Qty::new(d)
    }

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            vec![
                BookLevel::new(px(dec!(1.0999)), qty(dec!(1000))),
                BookLevel::new(px(dec!(1.0997)), qty(dec!(2000))),
                BookLevel::new(px(dec!(1.0995)), qty(dec!(3000))),
            ],
            vec![
                BookLevel::new(px(dec!(1.1001)), qty(dec!(1000))),
                BookLevel::new(px(dec!(1.1003)), qty(dec!(2000))),
            ],
        );
        book
    }

    #[test]
    fn test_best_prices() {
        let book = sample_book();
        assert_eq!(book.best_bid(), Some(px(dec!(1.0999))));
        assert_eq!(book.best_ask(), Some(px(dec!(1.1001))));
    }

    #[test]
    fn test_not_ready_without_snapshot() {
        let book = OrderBook::new();
        assert!(!book.is_ready());
        assert_eq!(book.best_bid(), None);
        assert!(book
            .vwap(Side::Bid, &[qty(dec!(1000))], VwapParams::default())
            .iter()
            .all(Option::is_none));
    }

    #[test]
    fn test_error_flag_hides_prices() {
        let mut book = sample_book();
        book.set_error();
        assert!(book.has_error());
        assert_eq!(book.best_bid(), None);

        // A fresh snapshot recovers the book.
        book.apply_snapshot(
            vec![BookLevel::new(px(dec!(1.1)), qty(dec!(500)))],
            vec![BookLevel::new(px(dec!(1.2)), qty(dec!(500)))],
        );
        assert!(book.is_ready());
    }

    #[test]
    fn test_vwap_single_band_within_top_level() {
        let book = sample_book();
        let v = book.vwap(Side::Bid, &[qty(dec!(1000))], VwapParams::default());
        assert_eq!(v[0], Some(px(dec!(1.0999))));
    }

    #[test]
    fn test_vwap_cumulative_walk() {
        let book = sample_book();
        let v = book.vwap(
            Side::Bid,
            &[qty(dec!(1000)), qty(dec!(2000))],
            VwapParams::default(),
        );
        // Band 0 consumes the top level; band 1 averages the next slice.
        assert_eq!(v[0], Some(px(dec!(1.0999))));
        assert_eq!(v[1], Some(px(dec!(1.0997))));
    }

    #[test]
    fn test_vwap_blends_across_levels() {
        let book = sample_book();
        let v = book.vwap(Side::Ask, &[qty(dec!(2000))], VwapParams::default());
        // 1000@1.1001 + 1000@1.1003 -> 1.1002
        assert_eq!(v[0], Some(px(dec!(1.1002))));
    }

    #[test]
    fn test_vwap_insufficient_depth_cuts_deeper_bands() {
        let book = sample_book();
        let v = book.vwap(
            Side::Ask,
            &[qty(dec!(2000)), qty(dec!(5000)), qty(dec!(1000))],
            VwapParams::default(),
        );
        assert!(v[0].is_some());
        assert_eq!(v[1], None);
        assert_eq!(v[2], None);
    }

    #[test]
    fn test_manipulation_reduction_discounts_top_level() {
        let book = sample_book();
        let params = VwapParams {
            manip_red_coeff: dec!(0.5),
            manip_red_only_l1: true,
        };
        // Top bid level is worth only 500 now, so a 1000 band blends
        // 500@1.0999 with 500@1.0997.
        let v = book.vwap(Side::Bid, &[qty(dec!(1000))], params);
        assert_eq!(v[0], Some(px(dec!(1.0998))));
    }

    #[test]
    fn test_apply_rejects_non_positive_levels() {
        let mut set = BookSet::new();
        let id = BookId::Quoted(InstrKey::new(Tenor::Near, Pair::Primary));
        set.get_mut(id).apply_snapshot(
            vec![BookLevel::new(px(dec!(1.1)), qty(dec!(1)))],
            vec![BookLevel::new(px(dec!(1.2)), qty(dec!(1)))],
        );

        let res = set.apply(
            id,
            vec![BookLevel::new(px(dec!(1.1)), qty(dec!(0)))],
            vec![],
        );
        assert!(matches!(res, Err(FeedError::InvalidSnapshot { .. })));
        // The book stays dark until a good snapshot arrives.
        assert!(set.get(id).has_error());
        assert_eq!(set.get(id).best_bid(), None);

        set.apply(
            id,
            vec![BookLevel::new(px(dec!(1.1)), qty(dec!(500)))],
            vec![BookLevel::new(px(dec!(1.2)), qty(dec!(500)))],
        )
        .unwrap();
        assert!(set.get(id).is_ready());
    }

    #[test]
    fn test_book_set_indexing() {
        let mut set = BookSet::new();
        let id = BookId::Quoted(InstrKey::new(Tenor::Near, Pair::Primary));
        set.get_mut(id).apply_snapshot(
            vec![BookLevel::new(px(dec!(1.1)), qty(dec!(1)))],
            vec![BookLevel::new(px(dec!(1.2)), qty(dec!(1)))],
        );
        assert!(set.get(id).is_ready());
        assert!(!set.get(BookId::Cross(Tenor::Near)).is_ready());
        assert!(!set.all_ready(&[id, BookId::Cross(Tenor::Near)]));
    }
}
