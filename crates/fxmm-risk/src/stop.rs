//! StopController: staged shutdown state machine.
//!
//! A delayed stop latches once and starts a grace timeline. Polling the
//! controller drives the escalation steps: after 1 second the caller must
//! cancel all resting orders (repeatable, cancels are idempotent), after
//! 5 seconds the stop escalates to semi-graceful exactly once. Operator
//! signals map to graceful stop on the first signal and immediate exit on
//! the second.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::{error, warn};

use fxmm_core::{BookId, ConnectorId, InstrKey, ReqKind, Tenor};

// ============================================================================
// StopReason
// ============================================================================

/// Reason a delayed stop was initiated.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// An order was found in an impossible bookkeeping state.
    OrderStateCorrupt {
        /// Description of the inconsistency.
        detail: String,
    },
    /// The cancel-pending registry overflowed its fixed capacity.
    CancelRegistryOverflow,
    /// Computed quote prices violated top-of-book monotonicity.
    PriceMonotonicity {
        /// Instrument whose ladder was inconsistent.
        instr: InstrKey,
    },
    /// New bid and new ask both crossed the current quotes.
    QuotesBothWaysCrossed {
        /// Instrument whose quotes contradicted each other.
        instr: InstrKey,
    },
    /// A market or quoting connector dropped.
    ConnectorDown {
        /// Which connector dropped.
        connector: ConnectorId,
    },
    /// No valuation source could be installed for a tenor.
    NoValuation {
        /// Tenor lacking both a cross book and a fallback rate.
        tenor: Tenor,
    },
    /// A venue cancelled an order the engine considers unrecoverable.
    UnexpectedCancel {
        /// Book the order belonged to.
        book: BookId,
    },
    /// A synchronous venue submission failed.
    RequestFailed {
        /// Kind of the failed request.
        kind: ReqKind,
    },
    /// The risk manager entered safe mode.
    RiskSafeMode,
    /// Manual stop requested by the operator.
    Signal,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderStateCorrupt { detail } => write!(f, "Order state corrupt: {}", detail),
            Self::CancelRegistryOverflow => write!(f, "Cancel-pending registry overflow"),
            Self::PriceMonotonicity { instr } => {
                write!(f, "Price monotonicity violated: {}", instr)
            }
            Self::QuotesBothWaysCrossed { instr } => {
                write!(f, "Quotes crossed both ways: {}", instr)
            }
            Self::ConnectorDown { connector } => write!(f, "Connector down: {:?}", connector),
            Self::NoValuation { tenor } => write!(f, "No valuation source for tenor {}", tenor),
            Self::UnexpectedCancel { book } => write!(f, "Unexpected cancel on {:?}", book),
            Self::RequestFailed { kind } => write!(f, "Venue {} request failed", kind),
            Self::RiskSafeMode => write!(f, "Risk manager in safe mode"),
            Self::Signal => write!(f, "Operator signal"),
        }
    }
}

// ============================================================================
// SignalAction / StopPoll
// ============================================================================

/// What the caller must do in response to an operator signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: start a graceful stop.
    GracefulStop,
    /// Second signal: dump positions and exit the process.
    ExitNow,
}

/// Actions required by the stop timeline at a given poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopPoll {
    /// Cancel every resting order, pegged orders included.
    pub cancel_all: bool,
    /// Escalate to semi-graceful shutdown (fires at most once).
    pub escalate: bool,
}

// ============================================================================
// StopController
// ============================================================================

/// Grace period before the stop timeline starts cancelling orders.
const CANCEL_GRACE_MS: i64 = 1_000;
/// Grace period before the stop escalates to semi-graceful.
const ESCALATE_GRACE_MS: i64 = 5_000;

/// Staged shutdown controller.
///
/// Once a delayed stop is initiated, it remains initiated. While stopping,
/// cancels are always permitted but new orders and pegged orders must be
/// suppressed by the caller.
///
/// Thread-safe: share via `Arc<StopController>`.
pub struct StopController {
    /// Delayed stop initiated (latches once).
    stopping: AtomicBool,
    /// Timestamp when the delayed stop was initiated (ms, 0 if not).
    initiated_at_ms: AtomicI64,
    /// Semi-graceful escalation already performed.
    semi_graceful: AtomicBool,
    /// Operator signals received so far.
    signals: AtomicU32,
    /// Reason for the first delayed stop.
    reason: RwLock<Option<StopReason>>,
}

impl Default for StopController {
    fn default() -> Self {
        Self::new()
    }
}

impl StopController {
    /// Create a controller in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stopping: AtomicBool::new(false),
            initiated_at_ms: AtomicI64::new(0),
            semi_graceful: AtomicBool::new(false),
            signals: AtomicU32::new(0),
            reason: RwLock::new(None),
        }
    }

    /// Whether a delayed stop has been initiated.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Whether the stop has escalated to semi-graceful.
    #[must_use]
    pub fn is_semi_graceful(&self) -> bool {
        self.semi_graceful.load(Ordering::SeqCst)
    }

    /// Initiate a delayed stop.
    ///
    /// Latches once: repeat calls keep the original reason and timestamp.
    /// No orders are cancelled here; cancellation is driven by `poll`.
    pub fn delayed_stop(&self, reason: StopReason, now_ms: i64) {
        if self
            .stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.initiated_at_ms.store(now_ms, Ordering::SeqCst);
            {
                let mut guard = self.reason.write();
                *guard = Some(reason.clone());
            }
            error!(reason = %reason, "DELAYED STOP INITIATED");
        } else {
            warn!(new_reason = %reason, "Delayed stop already initiated, ignoring");
        }
    }

    /// Reason for the delayed stop, if initiated.
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        if self.is_stopping() {
            self.reason.read().clone()
        } else {
            None
        }
    }

    /// Advance the stop timeline.
    ///
    /// Returns `None` when no stop is underway. Otherwise `cancel_all` is
    /// set once the first grace expires (and on every subsequent poll, so a
    /// cancel that raced a new order gets retried), and `escalate` is set
    /// exactly once after the second grace.
    pub fn poll(&self, now_ms: i64) -> Option<StopPoll> {
        if !self.is_stopping() {
            return None;
        }
        let initiated = self.initiated_at_ms.load(Ordering::SeqCst);
        let elapsed = now_ms - initiated;

        let mut out = StopPoll::default();
        if elapsed > CANCEL_GRACE_MS {
            out.cancel_all = true;
        }
        if elapsed > ESCALATE_GRACE_MS
            && self
                .semi_graceful
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            out.escalate = true;
        }
        Some(out)
    }

    /// Handle an operator signal.
    ///
    /// First signal starts a graceful stop, the second demands immediate
    /// exit. Further signals keep returning `ExitNow`.
    pub fn on_signal(&self, now_ms: i64) -> SignalAction {
        let count = self.signals.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            self.delayed_stop(StopReason::Signal, now_ms);
            SignalAction::GracefulStop
        } else {
            warn!(count = count, "Repeated stop signal, exiting immediately");
            SignalAction::ExitNow
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initially_running() {
        let stop = StopController::new();
        assert!(!stop.is_stopping());
        assert!(stop.reason().is_none());
        assert!(stop.poll(1_000).is_none());
    }

    #[test]
    fn test_delayed_stop_latches_once() {
        let stop = StopController::new();
        stop.delayed_stop(StopReason::CancelRegistryOverflow, 100);
        stop.delayed_stop(StopReason::Signal, 200);

        assert!(stop.is_stopping());
        assert_eq!(stop.reason(), Some(StopReason::CancelRegistryOverflow));
    }

    #[test]
    fn test_poll_timeline() {
        let stop = StopController::new();
        stop.delayed_stop(StopReason::Signal, 10_000);

        // Within the first grace: nothing to do yet.
        let p = stop.poll(10_500).unwrap();
        assert!(!p.cancel_all);
        assert!(!p.escalate);

        // After 1s: cancel everything.
        let p = stop.poll(11_100).unwrap();
        assert!(p.cancel_all);
        assert!(!p.escalate);

        // Cancel-all repeats on every poll past the grace.
        let p = stop.poll(11_200).unwrap();
        assert!(p.cancel_all);

        // After 5s: escalate, once.
        let p = stop.poll(15_100).unwrap();
        assert!(p.cancel_all);
        assert!(p.escalate);
        assert!(stop.is_semi_graceful());

        let p = stop.poll(16_000).unwrap();
        assert!(p.cancel_all);
        assert!(!p.escalate);
    }

    #[test]
    fn test_signal_escalation() {
        let stop = StopController::new();
        assert_eq!(stop.on_signal(1_000), SignalAction::GracefulStop);
        assert!(stop.is_stopping());
        assert_eq!(stop.reason(), Some(StopReason::Signal));

        assert_eq!(stop.on_signal(1_500), SignalAction::ExitNow);
        assert_eq!(stop.on_signal(2_000), SignalAction::ExitNow);
    }

    #[test]
    fn test_signal_after_delayed_stop_keeps_reason() {
        let stop = StopController::new();
        stop.delayed_stop(
            StopReason::ConnectorDown {
                connector: ConnectorId::MarketData,
            },
            500,
        );
        assert_eq!(stop.on_signal(600), SignalAction::GracefulStop);
        assert_eq!(
            stop.reason(),
            Some(StopReason::ConnectorDown {
                connector: ConnectorId::MarketData
            })
        );
    }
}
