//! Order lifecycle controller.
//!
//! The central state machine: decides New/Modify/Cancel per slot from
//! slot occupancy, price changes, throttling and stop conditions, and
//! drives covering orders for inventory flattening. All state here is
//! owned by the single event-loop task; handlers run to completion and
//! every handler takes `now_ms` so tests are deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use rust_decimal::Decimal;
use tracing::{debug, error, info, trace, warn};

use fxmm_core::{
    BookId, InstrKey, InstrMap, OrderHandle, OrderOrigin, OrderRecord, OrderStore, Price, Qty,
    ReqKind, Side, SlotKey, SlotMap,
};
use fxmm_feed::{BookSet, VwapParams};
use fxmm_risk::{Leg, RiskManager, RiskMode, StopController, StopReason};

use crate::config::{EngineConfig, InstrConfig};
use crate::covering::plan_cover;
use crate::error::EngineResult;
use crate::pricing::{compute_ladder, Ladder, LadderInputs};
use crate::slots::{CancelPendingRegistry, OrderLocation, OrderSlotTable};
use crate::venue::{NewOrderReq, OrderEntry, VenueKind};

/// Outcome of one quote submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStatus {
    /// The ladder has no price for this band.
    NoQuotePx,
    /// The occupant has an unresolved cancel; nothing can be done yet.
    MustWait,
    /// Price identical to the quoted one; no message sent.
    PxUnchanged,
    /// New submission suppressed by the minimum inter-quote interval.
    Throttled,
    /// The venue rejected the request synchronously.
    Failed,
    Done,
}

/// Sliding one-second request counter for the soft rate limit.
#[derive(Debug)]
struct RateMeter {
    window_start_ms: i64,
    count: u32,
    limit: u32,
}

impl RateMeter {
    fn new(limit: u32) -> Self {
        Self {
            window_start_ms: 0,
            count: 0,
            limit,
        }
    }

    fn roll(&mut self, now_ms: i64) {
        if now_ms - self.window_start_ms >= 1_000 {
            self.window_start_ms = now_ms;
            self.count = 0;
        }
    }

    fn record(&mut self, now_ms: i64) {
        self.roll(now_ms);
        self.count += 1;
    }

    fn over_limit(&mut self, now_ms: i64) -> bool {
        self.roll(now_ms);
        self.count >= self.limit
    }
}

/// Result of order-location reconciliation.
#[derive(Debug, Clone, Copy)]
struct Located {
    origin: OrderOrigin,
    side: Side,
    loc: OrderLocation,
}

/// The lifecycle state machine, generic over the two venues.
///
/// Sole writer of the slot table, the cancel-pending registry and the
/// per-band price memo.
pub struct OrderLifecycleController<Q: OrderEntry, H: OrderEntry> {
    cfg: EngineConfig,
    instr_cfg: InstrMap<Option<InstrConfig>>,
    quote_venue: Q,
    hedge_venue: H,
    stop: Arc<StopController>,
    risk: RiskManager,
    store: OrderStore,
    by_venue_id: HashMap<(VenueKind, u64), OrderHandle>,
    slots: OrderSlotTable,
    registry: CancelPendingRegistry,
    /// Last submitted quote price per slot. Memoised on New/Modify
    /// success and kept across fills and cancels for re-quoting.
    curr_px: SlotMap<Option<Price>>,
    /// Time of the last successful New per slot; Modify does not
    /// refresh it.
    last_quote_ms: SlotMap<i64>,
    /// Previous best prices per instrument, for re-pegging.
    last_best: InstrMap<[Option<Price>; 2]>,
    /// Live pegged covering order per (instrument, side).
    pegged: InstrMap<[Option<OrderHandle>; 2]>,
    /// Quantity committed to in-flight covering orders.
    flying: InstrMap<Qty>,
    enabled: InstrMap<bool>,
    rounds: u32,
    quoting_halted: bool,
    meter: RateMeter,
}

impl<Q: OrderEntry, H: OrderEntry> OrderLifecycleController<Q, H> {
    pub fn new(
        cfg: EngineConfig,
        quote_venue: Q,
        hedge_venue: H,
        risk: RiskManager,
        stop: Arc<StopController>,
    ) -> EngineResult<Self> {
        cfg.validate()?;
        let mut instr_cfg: InstrMap<Option<InstrConfig>> = InstrMap::default();
        let mut enabled = InstrMap::filled(false);
        for ic in &cfg.instruments {
            enabled[ic.key()] = ic.enabled;
            instr_cfg[ic.key()] = Some(ic.clone());
        }
        let meter = RateMeter::new(cfg.max_reqs_per_sec);
        Ok(Self {
            cfg,
            instr_cfg,
            quote_venue,
            hedge_venue,
            stop,
            risk,
            store: OrderStore::new(),
            by_venue_id: HashMap::new(),
            slots: OrderSlotTable::new(),
            registry: CancelPendingRegistry::default(),
            curr_px: SlotMap::filled(None),
            last_quote_ms: SlotMap::filled(i64::MIN / 2),
            last_best: InstrMap::filled([None; 2]),
            pegged: InstrMap::filled([None; 2]),
            flying: InstrMap::filled(Qty::ZERO),
            enabled,
            rounds: 0,
            quoting_halted: false,
            meter,
        })
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    /// Resolve a venue-reported order id to its handle.
    pub fn lookup_order(&self, venue: VenueKind, id: u64) -> Option<OrderHandle> {
        self.by_venue_id.get(&(venue, id)).copied()
    }

    pub fn flying_delta(&self, instr: InstrKey) -> Qty {
        self.flying[instr]
    }

    pub fn quoted_px(&self, key: SlotKey) -> Option<Price> {
        self.curr_px[key]
    }

    pub fn slot(&self, key: SlotKey) -> Option<OrderHandle> {
        self.slots.get(key)
    }

    pub fn cancel_pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_quoting_halted(&self) -> bool {
        self.quoting_halted
    }

    fn reap(&mut self, h: OrderHandle) {
        if let Some(rec) = self.store.remove(h) {
            let venue = if rec.origin.is_quote() {
                VenueKind::Quote
            } else {
                VenueKind::Hedge
            };
            self.by_venue_id.remove(&(venue, rec.venue_id));
        }
    }

    fn semi_netted_position(&self, instr: InstrKey) -> Qty {
        self.risk.net_position(instr) + self.flying[instr]
    }

    // ------------------------------------------------------------------
    // Quote refresh
    // ------------------------------------------------------------------

    /// Recompute the ladder for one instrument and diff it against the
    /// slot table.
    pub fn do_quotes(&mut self, instr: InstrKey, books: &BookSet, now_ms: i64) {
        if self.quoting_halted || self.stop.is_stopping() || !self.enabled[instr] {
            return;
        }
        let Some(icfg) = self.instr_cfg[instr].clone() else {
            return;
        };
        let book = books.get(BookId::Quoted(instr));
        if !book.is_ready() {
            return;
        }

        // Reap occupants observed inactive before pricing, so their
        // slots are treated as empty within the same refresh pass.
        for side in Side::BOTH {
            for band in 0..icfg.n_bands {
                let key = SlotKey::new(instr, side, band);
                if let Some(h) = self.slots.get(key) {
                    match self.store.get(h) {
                        None => self.slots.clear(key),
                        Some(rec) if rec.is_inactive => {
                            self.slots.clear(key);
                            self.reap(h);
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        let position = self.semi_netted_position(instr);
        let mut curr_bids = vec![None; icfg.n_bands];
        let mut curr_asks = vec![None; icfg.n_bands];
        for band in 0..icfg.n_bands {
            let bid_key = SlotKey::new(instr, Side::Bid, band);
            let ask_key = SlotKey::new(instr, Side::Ask, band);
            if !self.slots.is_empty(bid_key) {
                curr_bids[band] = self.curr_px[bid_key];
            }
            if !self.slots.is_empty(ask_key) {
                curr_asks[band] = self.curr_px[ask_key];
            }
        }
        let over_rate_limit = self.meter.over_limit(now_ms);

        let inputs = LadderInputs {
            book,
            cfg: &icfg,
            position,
            curr_bids: &curr_bids,
            curr_asks: &curr_asks,
            over_rate_limit,
            skew_both_sides: self.cfg.skew_both_sides,
            symmetric_bands: self.cfg.symmetric_bands,
            vwap: VwapParams {
                manip_red_coeff: self.cfg.manip_red_coeff,
                manip_red_only_l1: self.cfg.manip_red_only_l1,
            },
        };
        let ladder = match compute_ladder(&inputs) {
            Ok(ladder) => ladder,
            Err(e) => {
                error!(instr = %instr, error = %e, "Pricing integrity failure");
                self.stop
                    .delayed_stop(StopReason::PriceMonotonicity { instr }, now_ms);
                return;
            }
        };
        self.submit_quotes(instr, &icfg, &ladder, now_ms);
    }

    fn live_quoted_px(&self, key: SlotKey) -> Option<Price> {
        if self.slots.is_empty(key) {
            None
        } else {
            self.curr_px[key]
        }
    }

    fn submit_quotes(&mut self, instr: InstrKey, icfg: &InstrConfig, ladder: &Ladder, now_ms: i64) {
        // The side whose new band 0 would cross the other side's current
        // quote goes first. Both at once is an unrecoverable
        // contradiction: withdraw the instrument's quotes.
        let curr_bid0 = self.live_quoted_px(SlotKey::new(instr, Side::Bid, 0));
        let curr_ask0 = self.live_quoted_px(SlotKey::new(instr, Side::Ask, 0));
        let ask_first = matches!(
            (ladder.bids[0], curr_ask0),
            (Some(new_bid), Some(cur_ask)) if new_bid >= cur_ask
        );
        let bid_first = matches!(
            (ladder.asks[0], curr_bid0),
            (Some(new_ask), Some(cur_bid)) if new_ask <= cur_bid
        );
        if ask_first && bid_first {
            error!(
                instr = %instr,
                new_bid = ?ladder.bids[0],
                new_ask = ?ladder.asks[0],
                curr_bid = ?curr_bid0,
                curr_ask = ?curr_ask0,
                "New quotes cross current quotes in both directions"
            );
            self.cancel_instrument_quotes(instr, now_ms);
            self.quote_venue.flush();
            self.stop
                .delayed_stop(StopReason::QuotesBothWaysCrossed { instr }, now_ms);
            return;
        }
        let order = if ask_first {
            [Side::Ask, Side::Bid]
        } else {
            [Side::Bid, Side::Ask]
        };

        for side in order {
            for band in 0..icfg.n_bands {
                let key = SlotKey::new(instr, side, band);
                let status = self.submit_one_quote(key, ladder.side(side)[band], icfg, now_ms);
                trace!(slot = %key, status = ?status, "Quote submission");
                if self.stop.is_stopping() {
                    break;
                }
            }
        }
        self.quote_venue.flush();
    }

    /// Act on one slot: New, Modify, Cancel or skip.
    fn submit_one_quote(
        &mut self,
        key: SlotKey,
        px: Option<Price>,
        icfg: &InstrConfig,
        now_ms: i64,
    ) -> QuoteStatus {
        if let Some(h) = self.slots.get(key) {
            match self.store.get(h) {
                None => {
                    warn!(slot = %key, handle = %h, "Stale handle in slot");
                    self.slots.clear(key);
                }
                Some(rec) if rec.is_inactive => {
                    self.slots.clear(key);
                    self.reap(h);
                }
                Some(rec) if rec.is_cxl_pending() => return QuoteStatus::MustWait,
                Some(rec) => {
                    let venue_id = rec.venue_id;
                    let qty = rec.qty;
                    let Some(new_px) = px else {
                        // Band withdrawn: cancel the occupant.
                        self.cancel_order_safe(h, true, now_ms);
                        self.curr_px[key] = None;
                        return QuoteStatus::Done;
                    };
                    if self.curr_px[key] == Some(new_px) {
                        return QuoteStatus::PxUnchanged;
                    }
                    if self.cfg.dry_run {
                        debug!(slot = %key, px = %new_px, "Dry run: skipping Modify");
                        return QuoteStatus::Done;
                    }
                    return match self.quote_venue.modify_order(venue_id, Some(new_px), qty, true)
                    {
                        Ok(()) => {
                            self.meter.record(now_ms);
                            self.curr_px[key] = Some(new_px);
                            if let Some(rec) = self.store.get_mut(h) {
                                rec.px = Some(new_px);
                            }
                            QuoteStatus::Done
                        }
                        Err(e) => {
                            error!(slot = %key, error = %e, "Modify submission failed");
                            self.stop.delayed_stop(
                                StopReason::RequestFailed {
                                    kind: ReqKind::Modify,
                                },
                                now_ms,
                            );
                            QuoteStatus::Failed
                        }
                    };
                }
            }
        }

        // Empty slot.
        let Some(new_px) = px else {
            return QuoteStatus::NoQuotePx;
        };
        if now_ms - self.last_quote_ms[key] < self.cfg.min_inter_quote_ms {
            return QuoteStatus::Throttled;
        }
        let qty = icfg.band_qtys[key.band];
        if self.cfg.dry_run {
            debug!(slot = %key, px = %new_px, qty = %qty, "Dry run: skipping New");
            return QuoteStatus::Done;
        }
        let req = NewOrderReq {
            instr: key.instr,
            side: key.side,
            px: Some(new_px),
            qty,
            pegged: false,
            buffered: true,
        };
        match self.quote_venue.new_order(&req) {
            Ok(venue_id) => {
                self.meter.record(now_ms);
                let rec = OrderRecord::new(
                    venue_id,
                    key.side,
                    OrderOrigin::quote(key.instr, key.band),
                    Some(new_px),
                    qty,
                );
                let h = self.store.insert(rec);
                self.by_venue_id.insert((VenueKind::Quote, venue_id), h);
                self.slots.set(key, Some(h));
                self.curr_px[key] = Some(new_px);
                self.last_quote_ms[key] = now_ms;
                QuoteStatus::Done
            }
            Err(e) => {
                error!(slot = %key, error = %e, "New submission failed");
                self.stop
                    .delayed_stop(StopReason::RequestFailed { kind: ReqKind::New }, now_ms);
                QuoteStatus::Failed
            }
        }
    }

    /// Single conservative re-quote at the memoised price: only into an
    /// empty slot, flushed immediately.
    fn requote_slot(&mut self, key: SlotKey, icfg: &InstrConfig, now_ms: i64) {
        if self.quoting_halted || self.stop.is_stopping() || !self.enabled[key.instr] {
            return;
        }
        if !self.slots.is_empty(key) {
            return;
        }
        let px = self.curr_px[key];
        if px.is_none() {
            return;
        }
        let status = self.submit_one_quote(key, px, icfg, now_ms);
        trace!(slot = %key, status = ?status, "Re-quote");
        self.quote_venue.flush();
    }

    // ------------------------------------------------------------------
    // Cancels
    // ------------------------------------------------------------------

    /// Submit a cancel and move the order to the registry, clearing its
    /// slot in the same step. No-op when a cancel is already pending.
    fn cancel_order_safe(&mut self, h: OrderHandle, buffered: bool, now_ms: i64) {
        let Some(rec) = self.store.get(h) else {
            return;
        };
        if rec.is_inactive {
            self.clear_location(h, rec.origin, rec.side);
            self.reap(h);
            return;
        }
        if rec.is_cxl_pending() {
            return;
        }
        let venue_id = rec.venue_id;
        let origin = rec.origin;
        let side = rec.side;

        let result = if origin.is_quote() {
            self.quote_venue.cancel_order(venue_id, buffered)
        } else {
            self.hedge_venue.cancel_order(venue_id, buffered)
        };
        match result {
            Ok(()) => {
                self.meter.record(now_ms);
                if let Some(rec) = self.store.get_mut(h) {
                    rec.cxl_pending += 1;
                }
                if let Err(e) = self.registry.add(h) {
                    error!(handle = %h, error = %e, "Cancel-pending registry overflow");
                    self.stop
                        .delayed_stop(StopReason::CancelRegistryOverflow, now_ms);
                }
                self.clear_location(h, origin, side);
            }
            Err(e) => {
                error!(handle = %h, error = %e, "Cancel submission failed");
                self.stop.delayed_stop(
                    StopReason::RequestFailed {
                        kind: ReqKind::Cancel,
                    },
                    now_ms,
                );
            }
        }
    }

    fn clear_location(&mut self, h: OrderHandle, origin: OrderOrigin, side: Side) {
        if let Some(band) = origin.band {
            let key = SlotKey::new(origin.instr, side, band);
            if self.slots.get(key) == Some(h) {
                self.slots.clear(key);
            }
        } else if origin.pegged && self.pegged[origin.instr][side.idx()] == Some(h) {
            self.pegged[origin.instr][side.idx()] = None;
        }
    }

    fn cancel_instrument_quotes(&mut self, instr: InstrKey, now_ms: i64) {
        let n_bands = self
            .instr_cfg[instr]
            .as_ref()
            .map(|c| c.n_bands)
            .unwrap_or(0);
        for side in Side::BOTH {
            for band in 0..n_bands {
                let key = SlotKey::new(instr, side, band);
                if let Some(h) = self.slots.get(key) {
                    self.cancel_order_safe(h, true, now_ms);
                }
            }
        }
    }

    fn cancel_instrument_pegged(&mut self, instr: InstrKey, now_ms: i64) {
        for side in Side::BOTH {
            if let Some(h) = self.pegged[instr][side.idx()] {
                self.cancel_order_safe(h, true, now_ms);
            }
        }
    }

    /// Cancel every resting quote (and pegged covering orders when
    /// requested). Idempotent: a repeat finds the slots empty.
    pub fn cancel_all(&mut self, with_pegged: bool, now_ms: i64) {
        for instr in InstrKey::ALL {
            self.cancel_instrument_quotes(instr, now_ms);
            if with_pegged {
                self.cancel_instrument_pegged(instr, now_ms);
            }
        }
        self.quote_venue.flush();
        self.hedge_venue.flush();
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Find where an order currently resides. Both locations at once is
    /// fatal; neither is a benign race for quotes and normal for market
    /// covering orders. An inactive order is reaped in place.
    fn locate_order(&mut self, h: OrderHandle, now_ms: i64) -> Option<Located> {
        let Some(rec) = self.store.get(h) else {
            warn!(handle = %h, "Order not tracked anywhere, ignoring");
            return None;
        };
        let origin = rec.origin;
        let side = rec.side;
        let inactive = rec.is_inactive;

        let slot_loc = if let Some(band) = origin.band {
            let key = SlotKey::new(origin.instr, side, band);
            (self.slots.get(key) == Some(h)).then_some(OrderLocation::Slot(key))
        } else if origin.pegged {
            (self.pegged[origin.instr][side.idx()] == Some(h)).then_some(OrderLocation::Pegged)
        } else {
            None
        };
        let in_registry = self.registry.contains(h);

        if slot_loc.is_some() && in_registry {
            error!(handle = %h, instr = %origin.instr, "Order in slot and registry at once");
            self.stop.delayed_stop(
                StopReason::OrderStateCorrupt {
                    detail: format!("{h} present in slot and registry"),
                },
                now_ms,
            );
            return None;
        }

        let loc = slot_loc.unwrap_or(if in_registry {
            OrderLocation::CancelPending
        } else {
            OrderLocation::Nowhere
        });
        if loc == OrderLocation::Nowhere && origin.is_quote() {
            warn!(handle = %h, instr = %origin.instr, "Quote found in neither slot nor registry");
        }

        if inactive {
            match loc {
                OrderLocation::Slot(key) => self.slots.clear(key),
                OrderLocation::Pegged => self.pegged[origin.instr][side.idx()] = None,
                OrderLocation::CancelPending => {
                    self.registry.remove(h);
                }
                OrderLocation::Nowhere => {}
            }
            self.reap(h);
        }

        Some(Located { origin, side, loc })
    }

    // ------------------------------------------------------------------
    // Venue callbacks
    // ------------------------------------------------------------------

    /// Fill or partial fill.
    pub fn on_fill(
        &mut self,
        h: OrderHandle,
        fill_qty: Qty,
        px: Price,
        leaves: Qty,
        books: &BookSet,
        now_ms: i64,
    ) {
        let Some(located) = self.locate_order(h, now_ms) else {
            return;
        };
        let origin = located.origin;
        let side = located.side;
        let was_cp = located.loc == OrderLocation::CancelPending;
        let done = leaves.is_zero();

        if let Some(rec) = self.store.get_mut(h) {
            rec.leaves_qty = leaves;
            if done {
                rec.is_inactive = true;
            }
        }

        let leg = if origin.is_quote() {
            Leg::Passive
        } else {
            Leg::Aggressive
        };
        self.risk.on_fill(origin.instr, leg, side, fill_qty);
        info!(
            handle = %h,
            instr = %origin.instr,
            side = %side,
            qty = %fill_qty,
            px = %px,
            leaves = %leaves,
            quote = origin.is_quote(),
            "Fill"
        );

        if origin.is_quote() {
            let Some(band) = origin.band else { return };
            let key = SlotKey::new(origin.instr, side, band);
            if done {
                if was_cp {
                    self.registry.remove(h);
                } else if self.slots.get(key) == Some(h) {
                    self.slots.clear(key);
                }
                self.reap(h);
                self.rounds += 1;
                if self.rounds >= self.cfg.max_rounds {
                    warn!(rounds = self.rounds, "Maximum rounds reached, winding down quotes");
                    self.cancel_all(false, now_ms);
                    self.quoting_halted = true;
                } else if !was_cp && self.slots.is_empty(key) {
                    if let Some(icfg) = self.instr_cfg[origin.instr].clone() {
                        self.requote_slot(key, &icfg, now_ms);
                    }
                }
            } else if !was_cp {
                // This venue cannot modify partially-filled orders:
                // cancel the remainder, batched with the re-quote.
                self.cancel_order_safe(h, true, now_ms);
                if self.slots.is_empty(key) {
                    if let Some(icfg) = self.instr_cfg[origin.instr].clone() {
                        if !self.quoting_halted && !self.stop.is_stopping() {
                            let _ = self.submit_one_quote(key, self.curr_px[key], &icfg, now_ms);
                        }
                    }
                }
                self.quote_venue.flush();
            }
            self.maybe_cover(origin.instr, books, now_ms);
        } else {
            // Covering fill: the position now carries it, release the
            // flying delta.
            let signed = Qty::new(fill_qty.inner() * Decimal::from(side.sign()));
            self.flying[origin.instr] = self.flying[origin.instr] - signed;
            if done {
                if was_cp {
                    self.registry.remove(h);
                }
                self.clear_location(h, origin, side);
                self.reap(h);
            }
            self.maybe_cover(origin.instr, books, now_ms);
        }
    }

    /// A cancel request was confirmed by the venue.
    pub fn on_cancel_confirmed(&mut self, h: OrderHandle, books: &BookSet, now_ms: i64) {
        let (origin, side, remaining) = match self.store.get_mut(h) {
            Some(rec) => {
                rec.is_inactive = true;
                (rec.origin, rec.side, rec.leaves_qty)
            }
            None => {
                warn!(handle = %h, "Cancel confirmed for unknown order, ignoring");
                return;
            }
        };
        // Reconciliation reaps the now-inactive order in place.
        let Some(located) = self.locate_order(h, now_ms) else {
            return;
        };
        let was_cp = located.loc == OrderLocation::CancelPending;
        if matches!(located.loc, OrderLocation::Slot(_) | OrderLocation::Pegged) {
            warn!(handle = %h, "Cancel confirmed for order still in its slot");
        }

        if origin.is_quote() {
            if !was_cp {
                if let (Some(band), Some(icfg)) = (origin.band, self.instr_cfg[origin.instr].clone())
                {
                    let key = SlotKey::new(origin.instr, side, band);
                    self.requote_slot(key, &icfg, now_ms);
                }
            }
        } else {
            // The unfilled remainder is no longer in flight.
            let signed = Qty::new(remaining.inner() * Decimal::from(side.sign()));
            self.flying[origin.instr] = self.flying[origin.instr] - signed;
            self.maybe_cover(origin.instr, books, now_ms);
        }
    }

    /// A request was rejected by the venue.
    pub fn on_order_error(
        &mut self,
        h: OrderHandle,
        kind: ReqKind,
        detail: &str,
        probably_filled: bool,
        books: &BookSet,
        now_ms: i64,
    ) {
        warn!(handle = %h, kind = %kind, detail, probably_filled, "Order error");

        if kind == ReqKind::Cancel {
            let (venue_id, origin, active, still_pending) = match self.store.get_mut(h) {
                Some(rec) => {
                    if rec.cxl_pending > 0 {
                        rec.cxl_pending -= 1;
                    }
                    (rec.venue_id, rec.origin, !rec.is_inactive, rec.is_cxl_pending())
                }
                None => {
                    warn!(handle = %h, "Cancel error for unknown order, ignoring");
                    return;
                }
            };
            if active && !still_pending {
                // An orphaned live order is worse than a duplicate
                // cancel: retry once, unbuffered.
                let result = if origin.is_quote() {
                    self.quote_venue.cancel_order(venue_id, false)
                } else {
                    self.hedge_venue.cancel_order(venue_id, false)
                };
                match result {
                    Ok(()) => {
                        if let Some(rec) = self.store.get_mut(h) {
                            rec.cxl_pending += 1;
                        }
                    }
                    Err(e) => {
                        error!(handle = %h, error = %e, "Cancel retry failed");
                        self.stop.delayed_stop(
                            StopReason::RequestFailed {
                                kind: ReqKind::Cancel,
                            },
                            now_ms,
                        );
                    }
                }
            } else if !active {
                self.locate_order(h, now_ms);
            }
            return;
        }

        // New or Modify rejected.
        let Some(rec) = self.store.get(h) else {
            warn!(handle = %h, "{kind} error for unknown order, ignoring");
            return;
        };
        let origin = rec.origin;
        let side = rec.side;
        let leaves = rec.leaves_qty;

        if origin.is_quote() {
            if kind == ReqKind::New {
                // The order never became live; reap it.
                if let Some(rec) = self.store.get_mut(h) {
                    rec.is_inactive = true;
                }
                self.locate_order(h, now_ms);
            }
            // A rejected Modify leaves the order live at its previous
            // price; the conservative re-quote is a no-op then.
            if let (Some(band), Some(icfg)) = (origin.band, self.instr_cfg[origin.instr].clone()) {
                let key = SlotKey::new(origin.instr, side, band);
                self.requote_slot(key, &icfg, now_ms);
            }
        } else {
            let signed = Qty::new(leaves.inner() * Decimal::from(side.sign()));
            if probably_filled {
                // Safe default: assume the hedge happened until an
                // authoritative confirmation says otherwise.
                self.risk.on_fill(origin.instr, Leg::Aggressive, side, leaves);
                self.flying[origin.instr] = self.flying[origin.instr] - signed;
                if let Some(rec) = self.store.get_mut(h) {
                    rec.is_inactive = true;
                }
                self.locate_order(h, now_ms);
            } else if kind == ReqKind::New {
                // Never committed: release the flying delta and retry
                // the covering decision.
                self.flying[origin.instr] = self.flying[origin.instr] - signed;
                if let Some(rec) = self.store.get_mut(h) {
                    rec.is_inactive = true;
                }
                self.locate_order(h, now_ms);
                self.maybe_cover(origin.instr, books, now_ms);
            } else {
                // A rejected qty-grow on a pegged order: re-check need.
                self.maybe_cover(origin.instr, books, now_ms);
            }
        }
    }

    // ------------------------------------------------------------------
    // Covering
    // ------------------------------------------------------------------

    /// Re-evaluate the covering order for an instrument.
    fn maybe_cover(&mut self, instr: InstrKey, books: &BookSet, now_ms: i64) {
        let Some(icfg) = self.instr_cfg[instr].clone() else {
            return;
        };
        let position = self.semi_netted_position(instr);
        let Some(plan) = plan_cover(
            position,
            icfg.pos_limit,
            self.cfg.cover_whole_pos,
            icfg.hedge_lot,
        ) else {
            return;
        };
        if self.cfg.dry_run {
            info!(instr = %instr, side = %plan.side, qty = %plan.qty, "Dry run: would cover");
            return;
        }
        let signed = Qty::new(plan.qty.inner() * Decimal::from(plan.side.sign()));

        // Pegged covering tracks the opposite-side best price and is
        // never initiated while stopping.
        let ref_px = books.get(BookId::Quoted(instr)).best(plan.side.opposite());
        if self.cfg.use_pegging && ref_px.is_some() && !self.stop.is_stopping() {
            if let Some(h) = self.pegged[instr][plan.side.idx()] {
                match self.store.get(h) {
                    Some(rec) if !rec.is_inactive && !rec.is_cxl_pending() => {
                        // Grow the existing pegged order; its price is
                        // only updated on market-data events.
                        let venue_id = rec.venue_id;
                        let px = rec.px;
                        let new_qty = rec.qty + plan.qty;
                        match self.hedge_venue.modify_order(venue_id, px, new_qty, false) {
                            Ok(()) => {
                                if let Some(rec) = self.store.get_mut(h) {
                                    rec.qty = new_qty;
                                    rec.leaves_qty = rec.leaves_qty + plan.qty;
                                }
                                self.flying[instr] = self.flying[instr] + signed;
                                info!(instr = %instr, qty = %new_qty, "Pegged cover grown");
                            }
                            Err(e) => {
                                error!(instr = %instr, error = %e, "Pegged grow failed");
                                self.stop.delayed_stop(
                                    StopReason::RequestFailed {
                                        kind: ReqKind::Modify,
                                    },
                                    now_ms,
                                );
                            }
                        }
                        return;
                    }
                    Some(_) => return, // resolving; re-checked on confirmation
                    None => self.pegged[instr][plan.side.idx()] = None,
                }
            }
            let req = NewOrderReq {
                instr,
                side: plan.side,
                px: ref_px,
                qty: plan.qty,
                pegged: true,
                buffered: false,
            };
            match self.hedge_venue.new_order(&req) {
                Ok(venue_id) => {
                    let rec = OrderRecord::new(
                        venue_id,
                        plan.side,
                        OrderOrigin::cover(instr, true),
                        ref_px,
                        plan.qty,
                    );
                    let h = self.store.insert(rec);
                    self.by_venue_id.insert((VenueKind::Hedge, venue_id), h);
                    self.pegged[instr][plan.side.idx()] = Some(h);
                    self.flying[instr] = self.flying[instr] + signed;
                    info!(instr = %instr, side = %plan.side, qty = %plan.qty, px = ?ref_px, "Pegged cover placed");
                }
                Err(e) => {
                    error!(instr = %instr, error = %e, "Pegged cover failed");
                    self.stop
                        .delayed_stop(StopReason::RequestFailed { kind: ReqKind::New }, now_ms);
                }
            }
        } else {
            // Fire-and-forget market order; tracked only through the
            // flying delta and the handle for its callbacks.
            let req = NewOrderReq {
                instr,
                side: plan.side,
                px: None,
                qty: plan.qty,
                pegged: false,
                buffered: false,
            };
            match self.hedge_venue.new_order(&req) {
                Ok(venue_id) => {
                    let rec = OrderRecord::new(
                        venue_id,
                        plan.side,
                        OrderOrigin::cover(instr, false),
                        None,
                        plan.qty,
                    );
                    let h = self.store.insert(rec);
                    self.by_venue_id.insert((VenueKind::Hedge, venue_id), h);
                    self.flying[instr] = self.flying[instr] + signed;
                    info!(instr = %instr, side = %plan.side, qty = %plan.qty, "Market cover placed");
                }
                Err(e) => {
                    error!(instr = %instr, error = %e, "Market cover failed");
                    self.stop
                        .delayed_stop(StopReason::RequestFailed { kind: ReqKind::New }, now_ms);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Market data and timers
    // ------------------------------------------------------------------

    /// Order book updated (or errored) for one book.
    pub fn on_book_update(&mut self, book_id: BookId, is_error: bool, books: &BookSet, now_ms: i64) {
        let BookId::Quoted(instr) = book_id else {
            // Cross books feed valuation only.
            return;
        };
        let book = books.get(book_id);
        if is_error || book.best_bid().is_none() || book.best_ask().is_none() {
            warn!(instr = %instr, is_error, "Book unusable, withdrawing instrument quotes");
            self.cancel_instrument_quotes(instr, now_ms);
            self.quote_venue.flush();
            return;
        }
        if self.eval_stop_conds(books, now_ms) {
            return;
        }
        self.do_quotes(instr, books, now_ms);

        // Re-price live pegged covers when their reference moved.
        for side in Side::BOTH {
            let Some(h) = self.pegged[instr][side.idx()] else {
                continue;
            };
            let ref_side = side.opposite();
            let Some(new_ref) = book.best(ref_side) else {
                continue;
            };
            let (venue_id, qty, px) = match self.store.get(h) {
                Some(rec) if !rec.is_inactive && !rec.is_cxl_pending() => {
                    (rec.venue_id, rec.qty, rec.px)
                }
                _ => continue,
            };
            if self.last_best[instr][ref_side.idx()] == Some(new_ref) || px == Some(new_ref) {
                continue;
            }
            match self.hedge_venue.modify_order(venue_id, Some(new_ref), qty, false) {
                Ok(()) => {
                    if let Some(rec) = self.store.get_mut(h) {
                        rec.px = Some(new_ref);
                    }
                    debug!(instr = %instr, side = %side, px = %new_ref, "Pegged cover re-priced");
                }
                Err(e) => {
                    error!(instr = %instr, error = %e, "Pegged re-price failed");
                    self.stop.delayed_stop(
                        StopReason::RequestFailed {
                            kind: ReqKind::Modify,
                        },
                        now_ms,
                    );
                }
            }
        }
        self.last_best[instr] = [book.best_bid(), book.best_ask()];
    }

    /// Periodic timer: enforce the maximum re-quote interval.
    pub fn on_timer(&mut self, books: &BookSet, now_ms: i64) {
        if self.eval_stop_conds(books, now_ms) {
            return;
        }
        for instr in InstrKey::ALL {
            if !self.enabled[instr] {
                continue;
            }
            let n_bands = self
                .instr_cfg[instr]
                .as_ref()
                .map(|c| c.n_bands)
                .unwrap_or(0);
            let mut stale = false;
            'scan: for side in Side::BOTH {
                for band in 0..n_bands {
                    let key = SlotKey::new(instr, side, band);
                    if self.slots.is_empty(key)
                        && now_ms - self.last_quote_ms[key] > self.cfg.max_inter_quote_ms
                    {
                        stale = true;
                        break 'scan;
                    }
                }
            }
            if stale {
                self.do_quotes(instr, books, now_ms);
            }
        }
    }

    /// Evaluate stop conditions. Returns true when quoting must halt;
    /// cancels keep flowing regardless.
    pub fn eval_stop_conds(&mut self, books: &BookSet, now_ms: i64) -> bool {
        if self.risk.is_started() && self.risk.mode() == RiskMode::Safe {
            self.stop.delayed_stop(StopReason::RiskSafeMode, now_ms);
        }
        if let Some(poll) = self.stop.poll(now_ms) {
            if poll.cancel_all {
                self.cancel_all(true, now_ms);
            }
            if poll.escalate {
                warn!("Escalating to semi-graceful shutdown");
                self.risk.log_positions(books);
            }
            return true;
        }
        if self.quoting_halted {
            return true;
        }
        self.apply_quote_until(now_ms);
        false
    }

    /// Disable instruments past their time-of-day cutoff and pull their
    /// orders, once.
    fn apply_quote_until(&mut self, now_ms: i64) {
        let Some(now) = DateTime::from_timestamp_millis(now_ms) else {
            return;
        };
        let tod = now.time();
        for instr in InstrKey::ALL {
            if !self.enabled[instr] {
                continue;
            }
            let cutoff = self.instr_cfg[instr]
                .as_ref()
                .and_then(|c| c.quote_until_time());
            if let Some(cutoff) = cutoff {
                if tod >= cutoff {
                    info!(instr = %instr, %cutoff, "Quote cutoff reached, disabling instrument");
                    self.enabled[instr] = false;
                    self.cancel_instrument_quotes(instr, now_ms);
                    self.cancel_instrument_pegged(instr, now_ms);
                    self.quote_venue.flush();
                    self.hedge_venue.flush();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_meter_rolls_window() {
        let mut meter = RateMeter::new(2);
        assert!(!meter.over_limit(0));
        meter.record(0);
        meter.record(10);
        assert!(meter.over_limit(500));

        // New window resets the count.
        assert!(!meter.over_limit(1_200));
        meter.record(1_200);
        assert!(!meter.over_limit(1_300));
    }
}
