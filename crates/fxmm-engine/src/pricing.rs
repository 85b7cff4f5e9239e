//! Quote ladder computation.
//!
//! For one instrument, produces a semi-monotonic ladder of bid/ask
//! prices per band from the book's per-band VWAP, applying markup,
//! inventory skew, hysteresis and collision resolution. Missing
//! liquidity and sanity-range breaches withdraw bands or sides and are
//! never fatal; the only fatal outcome is a band-0 VWAP better than the
//! side's own best price, which signals a corrupted book.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use fxmm_core::{Price, Qty, RoundDir, Side};
use fxmm_feed::{OrderBook, VwapParams};

use crate::config::InstrConfig;

/// Fatal pricing failure. The caller initiates a delayed stop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("band-0 VWAP better than best price on {side} side")]
    VwapBeyondBest { side: Side },
}

/// Computed quote prices per band; `None` withdraws the band.
///
/// Defined bands form a prefix on each side: once a band is missing,
/// all deeper bands on that side are missing too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    pub bids: Vec<Option<Price>>,
    pub asks: Vec<Option<Price>>,
}

impl Ladder {
    pub fn empty(n_bands: usize) -> Self {
        Self {
            bids: vec![None; n_bands],
            asks: vec![None; n_bands],
        }
    }

    #[inline]
    pub fn side(&self, side: Side) -> &[Option<Price>] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<Option<Price>> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}

/// Everything the ladder computation reads.
pub struct LadderInputs<'a> {
    pub book: &'a OrderBook,
    pub cfg: &'a InstrConfig,
    /// Semi-netted position including the flying delta.
    pub position: Qty,
    /// Currently quoted prices per band, for hysteresis.
    pub curr_bids: &'a [Option<Price>],
    pub curr_asks: &'a [Option<Price>],
    /// Request rate is over the soft limit.
    pub over_rate_limit: bool,
    pub skew_both_sides: bool,
    pub symmetric_bands: bool,
    pub vwap: VwapParams,
}

/// `base^exp` via f64; skew exponents tolerate the precision loss.
fn decimal_pow(base: Decimal, exp: Decimal) -> Decimal {
    use rust_decimal::prelude::ToPrimitive;
    let b = base.to_f64().unwrap_or(0.0);
    let e = exp.to_f64().unwrap_or(1.0);
    Decimal::from_f64_retain(b.powf(e)).unwrap_or(Decimal::ZERO)
}

/// Whether quoting this side would add to a position already at its
/// limit: bids accumulate longs, asks accumulate shorts.
fn side_saturated(side: Side, position: Qty, pos_limit: Qty) -> bool {
    match side {
        Side::Bid => position >= pos_limit,
        Side::Ask => position <= -pos_limit,
    }
}

/// A price change that moves toward the inside of the book (a more
/// aggressive quote). Suppressed while over the soft rate limit.
fn moves_toward_inside(side: Side, new_px: Price, old_px: Price) -> bool {
    match side {
        Side::Bid => new_px > old_px,
        Side::Ask => new_px < old_px,
    }
}

/// Markup, limit price, inventory skew and directional rounding for one
/// band. Returns `None` when the external book is crossed, which
/// withdraws the whole side.
fn transform(
    side: Side,
    src: Price,
    band: usize,
    inp: &LadderInputs,
    best_bid: Price,
    best_ask: Price,
) -> Option<Price> {
    let cfg = inp.cfg;
    let step = cfg.px_step;

    if best_bid >= best_ask {
        warn!(
            instr = %cfg.key(),
            side = %side,
            best_bid = %best_bid,
            best_ask = %best_ask,
            "External book crossed, withdrawing side"
        );
        return None;
    }

    let mut px = match side {
        Side::Bid => Price::new(src.inner() - cfg.markups[band]),
        Side::Ask => Price::new(src.inner() + cfg.markups[band]),
    };

    // Tightest allowed price toward the opposite side: bounded by the
    // max improvement over the own best and never crossing the
    // opposite best.
    let limit = match side {
        Side::Bid => Price::new(
            (best_bid.inner() + cfg.max_improvement).min(best_ask.inner() - step),
        ),
        Side::Ask => Price::new(
            (best_ask.inner() - cfg.max_improvement).max(best_bid.inner() + step),
        ),
    };
    px = match side {
        Side::Bid => px.min(limit),
        Side::Ask => px.max(limit),
    };

    // Inventory skew: shift in the position-flattening direction, by a
    // fraction of the distance to the limit that saturates at the
    // position limit.
    let pos = inp.position;
    let reducing_side = if pos.is_positive() { Side::Ask } else { Side::Bid };
    if !pos.is_zero() && (inp.skew_both_sides || side == reducing_side) {
        let ratio = (pos.abs().inner() / cfg.pos_limit.inner()).min(Decimal::ONE);
        let dist = (limit.inner() - px.inner()).abs();
        let shift = dist * decimal_pow(ratio, cfg.beta);
        px = if pos.is_positive() {
            Price::new(px.inner() - shift)
        } else {
            Price::new(px.inner() + shift)
        };
        px = match side {
            Side::Bid => px.min(limit),
            Side::Ask => px.max(limit),
        };
    }

    // Round away from the limit, nudging one more step if rounding
    // still left the price across it.
    px = match side {
        Side::Bid => px.round_to_step(step, RoundDir::Down),
        Side::Ask => px.round_to_step(step, RoundDir::Up),
    };
    if matches!(side, Side::Bid) && px > limit {
        px = Price::new(px.inner() - step);
    } else if matches!(side, Side::Ask) && px < limit {
        px = Price::new(px.inner() + step);
    }
    Some(px)
}

fn final_sweep_ok(side: Side, ladder: &[Option<Price>], best_bid: Price, best_ask: Price) -> bool {
    if let Some(px0) = ladder.first().copied().flatten() {
        let crossed = match side {
            Side::Bid => px0 >= best_ask,
            Side::Ask => px0 <= best_bid,
        };
        if crossed {
            return false;
        }
    }
    let mut prev: Option<Price> = None;
    for px in ladder.iter().copied().flatten() {
        if let Some(p) = prev {
            let violated = match side {
                Side::Bid => px > p,
                Side::Ask => px < p,
            };
            if violated {
                return false;
            }
        }
        prev = Some(px);
    }
    true
}

/// Compute the full ladder for one instrument.
///
/// Returns an all-`None` ladder when the best prices are unavailable
/// (the caller withdraws the instrument's quotes).
pub fn compute_ladder(inp: &LadderInputs) -> Result<Ladder, PricingError> {
    let cfg = inp.cfg;
    let n = cfg.n_bands;
    let mut ladder = Ladder::empty(n);

    let (best_bid, best_ask) = match (inp.book.best_bid(), inp.book.best_ask()) {
        (Some(b), Some(a)) => (b, a),
        _ => return Ok(ladder),
    };

    for side in Side::BOTH {
        if side_saturated(side, inp.position, cfg.pos_limit) && !inp.symmetric_bands {
            continue;
        }
        let vwaps = inp.book.vwap(side, &cfg.band_qtys, inp.vwap);

        if let Some(v0) = vwaps.first().copied().flatten() {
            let beyond = match side {
                Side::Bid => v0 > best_bid,
                Side::Ask => v0 < best_ask,
            };
            if beyond {
                return Err(PricingError::VwapBeyondBest { side });
            }
        }

        let curr = match side {
            Side::Bid => inp.curr_bids,
            Side::Ask => inp.curr_asks,
        };
        let mut prev_final: Option<Price> = None;
        let mut withdraw_side = false;
        for band in 0..n {
            let src = match vwaps.get(band).copied().flatten() {
                Some(px) => px,
                None => break,
            };
            if src.inner() < cfg.px_min || src.inner() > cfg.px_max {
                warn!(
                    instr = %cfg.key(),
                    side = %side,
                    band,
                    src = %src,
                    "Source price outside sanity range"
                );
                break;
            }
            let mut px = match transform(side, src, band, inp, best_bid, best_ask) {
                Some(px) => px,
                None => {
                    withdraw_side = true;
                    break;
                }
            };

            // Hysteresis against the currently quoted price.
            if let Some(old_px) = curr.get(band).copied().flatten() {
                if band >= 1
                    && (px.inner() - old_px.inner()).abs() < cfg.resistances[band]
                {
                    px = old_px;
                } else if inp.over_rate_limit && moves_toward_inside(side, px, old_px) {
                    px = old_px;
                }
            }

            // Re-enforce monotonicity against the previous band's final
            // price, one step off when violated.
            if let Some(prev) = prev_final {
                match side {
                    Side::Bid if px > prev => px = Price::new(prev.inner() - cfg.px_step),
                    Side::Ask if px < prev => px = Price::new(prev.inner() + cfg.px_step),
                    _ => {}
                }
            }

            ladder.side_mut(side)[band] = Some(px);
            prev_final = Some(px);
        }
        if withdraw_side {
            for slot in ladder.side_mut(side).iter_mut() {
                *slot = None;
            }
        }
    }

    if inp.symmetric_bands {
        for band in 0..n {
            if ladder.bids[band].is_none() || ladder.asks[band].is_none() {
                ladder.bids[band] = None;
                ladder.asks[band] = None;
            }
        }
    }

    // Collision: push both sides apart by whole steps until the spread
    // is positive again.
    if let (Some(b0), Some(a0)) = (ladder.bids[0], ladder.asks[0]) {
        if b0 >= a0 {
            let step = cfg.px_step;
            let ns = b0.steps_from(a0, step) + 1;
            let n_bid = ns / 2;
            let n_ask = ns - n_bid;
            for px in ladder.bids.iter_mut().flatten() {
                *px = Price::new(px.inner() - Decimal::from(n_bid) * step);
            }
            for px in ladder.asks.iter_mut().flatten() {
                *px = Price::new(px.inner() + Decimal::from(n_ask) * step);
            }
        }
    }

    // Final sanity sweep: a violation withdraws the whole side.
    for side in Side::BOTH {
        if !final_sweep_ok(side, ladder.side(side), best_bid, best_ask) {
            warn!(instr = %cfg.key(), side = %side, "Final sweep failed, withdrawing side");
            for slot in ladder.side_mut(side).iter_mut() {
                *slot = None;
            }
        }
    }

    Ok(ladder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxmm_core::{Pair, Tenor};
    use fxmm_feed::BookLevel;
    use rust_decimal_macros::dec;

    fn cfg(n_bands: usize) -> InstrConfig {
        InstrConfig {
            tenor: Tenor::Near,
            pair: Pair::Primary,
            enabled: true,
            n_bands,
            band_qtys: vec![Qty::new(dec!(1_000_000)); n_bands],
            markups: vec![dec!(0.0001); n_bands],
            resistances: vec![dec!(0); n_bands],
            beta: dec!(1),
            max_improvement: dec!(0.0005),
            pos_limit: Qty::new(dec!(5_000_000)),
            px_min: dec!(0.5),
            px_max: dec!(2.0),
            px_step: dec!(0.0001),
            hedge_lot: Qty::new(dec!(100_000)),
            quote_until: None,
        }
    }

    fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBook {
        let mut b = OrderBook::new();
        b.apply_snapshot(
            bids.iter()
                .map(|(p, q)| BookLevel::new(Price::new(*p), Qty::new(*q)))
                .collect(),
            asks.iter()
                .map(|(p, q)| BookLevel::new(Price::new(*p), Qty::new(*q)))
                .collect(),
        );
        b
    }

    fn inputs<'a>(book: &'a OrderBook, cfg: &'a InstrConfig, position: Qty) -> LadderInputs<'a> {
        LadderInputs {
            book,
            cfg,
            position,
            curr_bids: &[],
            curr_asks: &[],
            over_rate_limit: false,
            skew_both_sides: false,
            symmetric_bands: false,
            vwap: VwapParams::default(),
        }
    }

    #[test]
    fn test_markup_quoting_flat_position() {
        // Best 1.0999 / 1.1001, markup 0.0001, flat position:
        // bid = 1.0999 - 0.0001 = 1.0998, ask = 1.1001 + 0.0001 = 1.1002.
        let cfg = cfg(1);
        let book = book(
            &[(dec!(1.0999), dec!(2_000_000))],
            &[(dec!(1.1001), dec!(2_000_000))],
        );
        let ladder = compute_ladder(&inputs(&book, &cfg, Qty::ZERO)).unwrap();

        assert_eq!(ladder.bids[0], Some(Price::new(dec!(1.0998))));
        assert_eq!(ladder.asks[0], Some(Price::new(dec!(1.1002))));
    }

    #[test]
    fn test_linear_skew_shift() {
        // Position +80% of limit, beta 1: the ask shifts toward its
        // limit by 0.8 of the remaining distance.
        let mut cfg = cfg(1);
        cfg.max_improvement = dec!(0.0001);
        let book = book(
            &[(dec!(1.0999), dec!(2_000_000))],
            &[(dec!(1.1011), dec!(2_000_000))],
        );
        // Ask before skew: 1.1011 + 0.0001 = 1.1012.
        // Ask limit: max(1.1011 - 0.0001, 1.0999 + 0.0001) = 1.1010.
        // dist = 0.0002, shift = 0.0002 * 0.8 = 0.00016,
        // px = 1.10104, rounded up to step = 1.1011.
        let pos = Qty::new(dec!(4_000_000));
        let ladder = compute_ladder(&inputs(&book, &cfg, pos)).unwrap();
        assert_eq!(ladder.asks[0], Some(Price::new(dec!(1.1011))));

        // Without skew the ask stays at 1.1012.
        let flat = compute_ladder(&inputs(&book, &cfg, Qty::ZERO)).unwrap();
        assert_eq!(flat.asks[0], Some(Price::new(dec!(1.1012))));
    }

    #[test]
    fn test_skew_both_sides_lowers_bid_too() {
        let mut cfg = cfg(1);
        cfg.max_improvement = dec!(0.0010);
        let book = book(
            &[(dec!(1.0999), dec!(2_000_000))],
            &[(dec!(1.1011), dec!(2_000_000))],
        );
        let pos = Qty::new(dec!(4_000_000));

        let one_sided = compute_ladder(&inputs(&book, &cfg, pos)).unwrap();
        let mut inp = inputs(&book, &cfg, pos);
        inp.skew_both_sides = true;
        let both = compute_ladder(&inp).unwrap();

        // One-sided skew leaves the bid at its unskewed value; both-sides
        // pushes it lower (long position skews down).
        assert!(both.bids[0].unwrap() < one_sided.bids[0].unwrap());
        assert_eq!(both.asks[0], one_sided.asks[0]);
    }

    #[test]
    fn test_saturated_side_withdrawn() {
        let cfg = cfg(1);
        let book = book(
            &[(dec!(1.0999), dec!(2_000_000))],
            &[(dec!(1.1001), dec!(2_000_000))],
        );
        // Long at the limit: no more bids, asks still quoted.
        let pos = Qty::new(dec!(5_000_000));
        let ladder = compute_ladder(&inputs(&book, &cfg, pos)).unwrap();
        assert_eq!(ladder.bids[0], None);
        assert!(ladder.asks[0].is_some());
    }

    #[test]
    fn test_insufficient_depth_cuts_deeper_bands() {
        let mut cfg = cfg(3);
        cfg.band_qtys = vec![
            Qty::new(dec!(1_000_000)),
            Qty::new(dec!(1_000_000)),
            Qty::new(dec!(5_000_000)),
        ];
        // Book depth covers the first two bands only.
        let book = book(
            &[
                (dec!(1.0999), dec!(1_500_000)),
                (dec!(1.0997), dec!(1_000_000)),
            ],
            &[
                (dec!(1.1001), dec!(1_500_000)),
                (dec!(1.1003), dec!(1_000_000)),
            ],
        );
        let ladder = compute_ladder(&inputs(&book, &cfg, Qty::ZERO)).unwrap();
        assert!(ladder.bids[0].is_some());
        assert!(ladder.bids[1].is_some());
        assert_eq!(ladder.bids[2], None);
    }

    #[test]
    fn test_sanity_range_withdraws_band_not_fatal() {
        let mut cfg = cfg(1);
        cfg.px_max = dec!(1.05);
        let book = book(
            &[(dec!(1.0999), dec!(2_000_000))],
            &[(dec!(1.1001), dec!(2_000_000))],
        );
        let ladder = compute_ladder(&inputs(&book, &cfg, Qty::ZERO)).unwrap();
        assert_eq!(ladder.bids[0], None);
        assert_eq!(ladder.asks[0], None);
    }

    #[test]
    fn test_hysteresis_keeps_old_price_within_resistance() {
        let mut cfg = cfg(2);
        cfg.resistances = vec![dec!(0), dec!(0.0005)];
        cfg.band_qtys = vec![Qty::new(dec!(1_000_000)), Qty::new(dec!(1_000_000))];
        let book = book(
            &[
                (dec!(1.0999), dec!(1_000_000)),
                (dec!(1.0997), dec!(1_000_000)),
            ],
            &[
                (dec!(1.1001), dec!(1_000_000)),
                (dec!(1.1003), dec!(1_000_000)),
            ],
        );
        // Band-1 bid would move to 1.0996 but the old quote is within
        // the 0.0005 resistance, so it is kept.
        let curr_bids = [None, Some(Price::new(dec!(1.0995)))];
        let mut inp = inputs(&book, &cfg, Qty::ZERO);
        inp.curr_bids = &curr_bids;
        let ladder = compute_ladder(&inp).unwrap();
        assert_eq!(ladder.bids[1], Some(Price::new(dec!(1.0995))));

        // Band 0 has no resistance: always re-priced.
        assert_eq!(ladder.bids[0], Some(Price::new(dec!(1.0998))));
    }

    #[test]
    fn test_over_rate_limit_keeps_old_px_toward_inside() {
        let cfg = cfg(1);
        let book = book(
            &[(dec!(1.0999), dec!(2_000_000))],
            &[(dec!(1.1001), dec!(2_000_000))],
        );
        // New bid 1.0998 would improve on the old 1.0996 (toward the
        // inside); over the soft limit the old price is kept.
        let curr_bids = [Some(Price::new(dec!(1.0996)))];
        let mut inp = inputs(&book, &cfg, Qty::ZERO);
        inp.curr_bids = &curr_bids;
        inp.over_rate_limit = true;
        let ladder = compute_ladder(&inp).unwrap();
        assert_eq!(ladder.bids[0], Some(Price::new(dec!(1.0996))));

        // Moves away from the inside still go through.
        let curr_bids = [Some(Price::new(dec!(1.0999)))];
        inp.curr_bids = &curr_bids;
        let ladder = compute_ladder(&inp).unwrap();
        assert_eq!(ladder.bids[0], Some(Price::new(dec!(1.0998))));
    }

    #[test]
    fn test_symmetric_bands_removal() {
        let mut cfg = cfg(2);
        cfg.band_qtys = vec![Qty::new(dec!(1_000_000)), Qty::new(dec!(2_000_000))];
        // Ask depth covers only band 0; bid depth covers both.
        let book = book(
            &[
                (dec!(1.0999), dec!(2_000_000)),
                (dec!(1.0997), dec!(2_000_000)),
            ],
            &[(dec!(1.1001), dec!(1_000_000))],
        );
        let mut inp = inputs(&book, &cfg, Qty::ZERO);
        let plain = compute_ladder(&inp).unwrap();
        assert!(plain.bids[1].is_some());
        assert_eq!(plain.asks[1], None);

        inp.symmetric_bands = true;
        let sym = compute_ladder(&inp).unwrap();
        assert_eq!(sym.bids[1], None);
        assert_eq!(sym.asks[1], None);
        assert!(sym.bids[0].is_some());
        assert!(sym.asks[0].is_some());
    }

    #[test]
    fn test_collision_push_apart() {
        // A negative markup with a wide improvement allowance drives
        // both sides to their caps, which cross each other when the
        // external spread is wide enough.
        let mut cfg = cfg(1);
        cfg.markups = vec![dec!(-0.0015)];
        cfg.max_improvement = dec!(0.0020);
        let book = book(
            &[(dec!(1.1000), dec!(2_000_000))],
            &[(dec!(1.1010), dec!(2_000_000))],
        );
        // bid = 1.1015 capped at 1.1009; ask = 1.0995 capped at 1.1001;
        // crossed by 8 steps -> push 9 steps total: bids down 4, asks
        // up 5.
        let ladder = compute_ladder(&inputs(&book, &cfg, Qty::ZERO)).unwrap();
        assert_eq!(ladder.bids[0], Some(Price::new(dec!(1.1005))));
        assert_eq!(ladder.asks[0], Some(Price::new(dec!(1.1006))));
    }

    #[test]
    fn test_crossed_external_book_withdraws_side() {
        let cfg = cfg(1);
        let book = book(
            &[(dec!(1.1002), dec!(2_000_000))],
            &[(dec!(1.1001), dec!(2_000_000))],
        );
        let ladder = compute_ladder(&inputs(&book, &cfg, Qty::ZERO)).unwrap();
        assert_eq!(ladder.bids[0], None);
        assert_eq!(ladder.asks[0], None);
    }

    #[test]
    fn test_not_ready_book_yields_empty_ladder() {
        let cfg = cfg(2);
        let b = OrderBook::new();
        let ladder = compute_ladder(&inputs(&b, &cfg, Qty::ZERO)).unwrap();
        assert!(ladder.bids.iter().all(Option::is_none));
        assert!(ladder.asks.iter().all(Option::is_none));
    }

    #[test]
    fn test_semi_monotonic_clamp_against_previous_band_final_px() {
        // Hysteresis can keep an old band-1 price above the freshly
        // computed band-0 price; the clamp pulls it back one step below
        // band 0's final price.
        let mut cfg = cfg(2);
        cfg.band_qtys = vec![Qty::new(dec!(1_000_000)), Qty::new(dec!(1_000_000))];
        cfg.resistances = vec![dec!(0), dec!(0.0005)];
        let book = book(
            &[
                (dec!(1.0999), dec!(1_000_000)),
                (dec!(1.0997), dec!(1_000_000)),
            ],
            &[
                (dec!(1.1001), dec!(1_000_000)),
                (dec!(1.1003), dec!(1_000_000)),
            ],
        );
        // Band-1 bid computes to 1.0996; the old quote 1.0999 is within
        // resistance, so hysteresis keeps it, violating monotonicity
        // against band 0's 1.0998.
        let curr_bids = [None, Some(Price::new(dec!(1.0999)))];
        let mut inp = inputs(&book, &cfg, Qty::ZERO);
        inp.curr_bids = &curr_bids;
        let ladder = compute_ladder(&inp).unwrap();

        assert_eq!(ladder.bids[0], Some(Price::new(dec!(1.0998))));
        assert_eq!(ladder.bids[1], Some(Price::new(dec!(1.0997))));
    }
}
