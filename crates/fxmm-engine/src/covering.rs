//! Covering-order sizing.
//!
//! Decides how much inventory to flatten on the hedge venue. The input
//! position is the semi-netted position: risk legs plus the flying
//! delta, so in-flight covering orders are never double-counted.

use fxmm_core::{Qty, Side};

/// A covering order to submit: flatten `qty` by trading `side`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverPlan {
    pub side: Side,
    /// Absolute quantity, a whole number of hedge lots.
    pub qty: Qty,
}

/// Size the covering order for a position.
///
/// No action while the position is within its limit, or when the
/// computed quantity rounds down to zero hedge lots.
pub fn plan_cover(
    position: Qty,
    pos_limit: Qty,
    cover_whole_pos: bool,
    hedge_lot: Qty,
) -> Option<CoverPlan> {
    let abs = position.abs();
    if abs <= pos_limit {
        return None;
    }
    let target = if cover_whole_pos { abs } else { abs - pos_limit };
    let qty = target.round_down_to_lot(hedge_lot);
    if qty.is_zero() {
        return None;
    }
    let side = if position.is_positive() {
        Side::Ask
    } else {
        Side::Bid
    };
    Some(CoverPlan { side, qty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_within_limit_no_action() {
        let plan = plan_cover(
            Qty::new(dec!(4_000_000)),
            Qty::new(dec!(5_000_000)),
            false,
            Qty::new(dec!(100_000)),
        );
        assert_eq!(plan, None);
    }

    #[test]
    fn test_excess_over_limit_rounded_to_lot() {
        let plan = plan_cover(
            Qty::new(dec!(5_750_000)),
            Qty::new(dec!(5_000_000)),
            false,
            Qty::new(dec!(500_000)),
        )
        .unwrap();
        // Excess 750k rounds down to one 500k lot; long flattens by
        // selling.
        assert_eq!(plan.side, Side::Ask);
        assert_eq!(plan.qty, Qty::new(dec!(500_000)));
    }

    #[test]
    fn test_excess_rounding_to_zero_lots_no_action() {
        let plan = plan_cover(
            Qty::new(dec!(5_300_000)),
            Qty::new(dec!(5_000_000)),
            false,
            Qty::new(dec!(500_000)),
        );
        assert_eq!(plan, None);
    }

    #[test]
    fn test_cover_whole_position() {
        let plan = plan_cover(
            Qty::new(dec!(-5_750_000)),
            Qty::new(dec!(5_000_000)),
            true,
            Qty::new(dec!(500_000)),
        )
        .unwrap();
        // Short flattens by buying the whole position, lot-rounded.
        assert_eq!(plan.side, Side::Bid);
        assert_eq!(plan.qty, Qty::new(dec!(5_500_000)));
    }
}
