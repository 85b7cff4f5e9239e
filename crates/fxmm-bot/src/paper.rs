//! Paper venues for dry runs.
//!
//! Accept every request, assign monotonic order ids and echo cancel
//! confirmations back into the event loop through a shared feedback
//! queue. Nothing ever fills on paper; fills only arrive from real
//! connectors.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use fxmm_core::{Price, Qty};
use fxmm_engine::{EngineResult, NewOrderReq, OrderEntry, VenueKind};

/// Venue-side event echoed back into the application loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaperFeedback {
    pub venue: VenueKind,
    pub venue_id: u64,
}

/// Queue shared between both paper venues and the application.
pub type FeedbackQueue = Arc<Mutex<VecDeque<PaperFeedback>>>;

pub struct PaperVenue {
    kind: VenueKind,
    next_id: u64,
    feedback: FeedbackQueue,
}

impl PaperVenue {
    pub fn new(kind: VenueKind, feedback: FeedbackQueue) -> Self {
        Self {
            kind,
            next_id: 0,
            feedback,
        }
    }
}

impl OrderEntry for PaperVenue {
    fn new_order(&mut self, req: &NewOrderReq) -> EngineResult<u64> {
        self.next_id += 1;
        debug!(
            venue = ?self.kind,
            id = self.next_id,
            instr = %req.instr,
            side = %req.side,
            px = ?req.px,
            qty = %req.qty,
            pegged = req.pegged,
            "Paper new order"
        );
        Ok(self.next_id)
    }

    fn modify_order(
        &mut self,
        id: u64,
        px: Option<Price>,
        qty: Qty,
        _buffered: bool,
    ) -> EngineResult<()> {
        debug!(venue = ?self.kind, id, px = ?px, qty = %qty, "Paper modify");
        Ok(())
    }

    fn cancel_order(&mut self, id: u64, _buffered: bool) -> EngineResult<()> {
        debug!(venue = ?self.kind, id, "Paper cancel");
        self.feedback.lock().push_back(PaperFeedback {
            venue: self.kind,
            venue_id: id,
        });
        Ok(())
    }

    fn flush(&mut self) {}
}
