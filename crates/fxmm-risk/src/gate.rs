//! ConnectivityGate: readiness gate for steady-state quoting.
//!
//! Quoting starts only once every connector is up and every required book
//! has delivered a snapshot. The gate fires exactly once: it installs the
//! valuators and starts the risk manager. A connector dropping at any
//! point, before or after activation, initiates a delayed stop.

use rust_decimal::Decimal;
use tracing::{info, warn};

use fxmm_core::{BookId, ConnectorId, Tenor};
use fxmm_feed::BookSet;

use crate::position::{RiskManager, RiskMode, ValuationSource};
use crate::stop::{StopController, StopReason};

/// Tracks connector liveness and drives one-shot activation.
pub struct ConnectivityGate {
    up: [bool; 3],
    required_books: Vec<BookId>,
    fired: bool,
}

impl ConnectivityGate {
    #[must_use]
    pub fn new(required_books: Vec<BookId>) -> Self {
        Self {
            up: [false; 3],
            required_books,
            fired: false,
        }
    }

    fn idx(connector: ConnectorId) -> usize {
        match connector {
            ConnectorId::MarketData => 0,
            ConnectorId::QuoteVenue => 1,
            ConnectorId::HedgeVenue => 2,
        }
    }

    /// Mark a connector as up.
    pub fn on_connector_up(&mut self, connector: ConnectorId) {
        info!(connector = %connector, "Connector up");
        self.up[Self::idx(connector)] = true;
    }

    /// Mark a connector as down. Any drop, whether before or after
    /// activation, is treated the same: a delayed stop.
    pub fn on_connector_down(
        &mut self,
        connector: ConnectorId,
        stop: &StopController,
        now_ms: i64,
    ) {
        warn!(connector = %connector, "Connector down");
        self.up[Self::idx(connector)] = false;
        stop.delayed_stop(StopReason::ConnectorDown { connector }, now_ms);
    }

    #[must_use]
    pub fn all_connectors_up(&self) -> bool {
        self.up.iter().all(|u| *u)
    }

    /// Whether the gate has already fired.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.fired
    }

    /// Attempt one-shot activation.
    ///
    /// Fires when all connectors are up and all required books are ready:
    /// installs a valuator per tenor (live cross book, otherwise the fixed
    /// fallback rate) and starts the risk manager in normal mode. Returns
    /// `true` exactly once, on the firing call; the caller then arms the
    /// max-inter-quote timer. A tenor with neither a ready cross book nor
    /// a fallback rate initiates a delayed stop and the gate stays unfired.
    pub fn try_activate(
        &mut self,
        books: &BookSet,
        risk: &mut RiskManager,
        fallback_rate: Option<Decimal>,
        stop: &StopController,
        now_ms: i64,
    ) -> bool {
        if self.fired || stop.is_stopping() {
            return false;
        }
        if !self.all_connectors_up() || !books.all_ready(&self.required_books) {
            return false;
        }

        for tenor in Tenor::ALL {
            let cross_id = BookId::Cross(tenor);
            if books.get(cross_id).is_ready() {
                risk.install_valuator(tenor, ValuationSource::Book(cross_id));
            } else if let Some(rate) = fallback_rate {
                warn!(tenor = %tenor, rate = %rate, "Cross book not ready, using fixed rate");
                risk.install_valuator(tenor, ValuationSource::Fixed(rate));
            } else {
                stop.delayed_stop(StopReason::NoValuation { tenor }, now_ms);
                return false;
            }
        }

        risk.start(RiskMode::Normal);
        self.fired = true;
        info!("Connectivity gate fired, quoting enabled");
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
