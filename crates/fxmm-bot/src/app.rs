//! Main application orchestration.
//!
//! Single event-loop task owning all mutable state: the book set, the
//! connectivity gate and the lifecycle controller. Connector tasks feed
//! the loop through a bounded mpsc channel; the loop never blocks on
//! them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fxmm_core::{BookId, ConnectorId, InstrKey, Qty, ReqKind};
use fxmm_engine::{OrderLifecycleController, VenueKind};
use fxmm_feed::{BookLevel, BookSet};
use fxmm_risk::{ConnectivityGate, RiskManager, SignalAction, StopController};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::paper::{FeedbackQueue, PaperVenue};

/// Everything the event loop reacts to, besides the timer and signals.
#[derive(Debug)]
pub enum BotEvent {
    ConnectorStatus {
        connector: ConnectorId,
        up: bool,
    },
    BookUpdate {
        book: BookId,
        is_error: bool,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    },
    Fill {
        venue: VenueKind,
        venue_id: u64,
        qty: Qty,
        px: fxmm_core::Price,
        leaves: Qty,
    },
    CancelConfirmed {
        venue: VenueKind,
        venue_id: u64,
    },
    OrderError {
        venue: VenueKind,
        venue_id: u64,
        kind: ReqKind,
        detail: String,
        probably_filled: bool,
    },
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Main application.
pub struct Application {
    config: AppConfig,
    books: BookSet,
    gate: ConnectivityGate,
    stop: Arc<StopController>,
    ctl: OrderLifecycleController<PaperVenue, PaperVenue>,
    feedback: FeedbackQueue,
    event_tx: mpsc::Sender<BotEvent>,
    event_rx: mpsc::Receiver<BotEvent>,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        // Every enabled instrument book plus the cross books per tenor
        // must be seen before quoting starts. Cross books may still be
        // absent at activation; the gate falls back to the fixed rate.
        let required_books: Vec<BookId> = config
            .engine
            .instruments
            .iter()
            .filter(|i| i.enabled)
            .map(|i| BookId::Quoted(i.key()))
            .collect();

        let stop = Arc::new(StopController::new());
        let feedback: FeedbackQueue = Default::default();
        let quote_venue = PaperVenue::new(VenueKind::Quote, feedback.clone());
        let hedge_venue = PaperVenue::new(VenueKind::Hedge, feedback.clone());

        let ctl = OrderLifecycleController::new(
            config.engine.clone(),
            quote_venue,
            hedge_venue,
            RiskManager::new(),
            stop.clone(),
        )?;

        let (event_tx, event_rx) = mpsc::channel(config.main.event_queue_depth);

        Ok(Self {
            config,
            books: BookSet::new(),
            gate: ConnectivityGate::new(required_books),
            stop,
            ctl,
            feedback,
            event_tx,
            event_rx,
        })
    }

    /// Sender half of the event channel, for connector tasks.
    pub fn event_sender(&self) -> mpsc::Sender<BotEvent> {
        self.event_tx.clone()
    }

    /// Run the event loop until stopped.
    pub async fn run(&mut self) -> AppResult<()> {
        info!(
            instruments = self.config.engine.instruments.len(),
            dry_run = self.config.engine.dry_run,
            "Entering main event loop"
        );
        let mut timer =
            tokio::time::interval(Duration::from_millis(self.config.main.timer_interval_ms));

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }

                _ = timer.tick() => {
                    if self.gate.is_active() {
                        self.ctl.on_timer(&self.books, now_ms());
                    } else {
                        // Covers stops initiated before activation.
                        self.ctl.eval_stop_conds(&self.books, now_ms());
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    match self.stop.on_signal(now_ms()) {
                        SignalAction::GracefulStop => {
                            info!("Stop signal received, winding down");
                        }
                        SignalAction::ExitNow => {
                            warn!("Repeated stop signal, exiting immediately");
                            break;
                        }
                    }
                }
            }

            self.drain_paper_feedback();

            if self.stop.is_semi_graceful() {
                info!("Semi-graceful deadline reached, exiting");
                break;
            }
        }

        // Last chance to pull everything, then report what remains.
        self.ctl.cancel_all(true, now_ms());
        self.drain_paper_feedback();
        self.ctl.risk().log_positions(&self.books);
        info!("Shutdown complete");
        Ok(())
    }

    fn handle_event(&mut self, event: BotEvent) {
        let now = now_ms();
        match event {
            BotEvent::ConnectorStatus { connector, up } => {
                if up {
                    self.gate.on_connector_up(connector);
                    self.try_activate(now);
                } else {
                    self.gate.on_connector_down(connector, &self.stop, now);
                }
            }

            BotEvent::BookUpdate {
                book,
                is_error,
                bids,
                asks,
            } => {
                if is_error {
                    self.books.get_mut(book).set_error();
                } else if let Err(e) = self.books.apply(book, bids, asks) {
                    warn!(error = %e, "Snapshot rejected");
                }
                // A rejected snapshot darkens the book like a feed error.
                let is_error = self.books.get(book).has_error();
                if self.gate.is_active() {
                    self.ctl.on_book_update(book, is_error, &self.books, now);
                } else {
                    self.try_activate(now);
                }
            }

            BotEvent::Fill {
                venue,
                venue_id,
                qty,
                px,
                leaves,
            } => match self.ctl.lookup_order(venue, venue_id) {
                Some(h) => self.ctl.on_fill(h, qty, px, leaves, &self.books, now),
                None => warn!(?venue, venue_id, "Fill for unknown order"),
            },

            BotEvent::CancelConfirmed { venue, venue_id } => {
                match self.ctl.lookup_order(venue, venue_id) {
                    Some(h) => self.ctl.on_cancel_confirmed(h, &self.books, now),
                    None => debug!(?venue, venue_id, "Cancel confirmed for unknown order"),
                }
            }

            BotEvent::OrderError {
                venue,
                venue_id,
                kind,
                detail,
                probably_filled,
            } => match self.ctl.lookup_order(venue, venue_id) {
                Some(h) => self.ctl.on_order_error(
                    h,
                    kind,
                    &detail,
                    probably_filled,
                    &self.books,
                    now,
                ),
                None => warn!(?venue, venue_id, kind = %kind, "Error for unknown order"),
            },
        }
    }

    fn try_activate(&mut self, now: i64) {
        if self.gate.try_activate(
            &self.books,
            self.ctl.risk_mut(),
            self.config.valuation.fallback_rate,
            &self.stop,
            now,
        ) {
            info!("Connectivity gate fired, quoting enabled");
            for instr in InstrKey::ALL {
                self.ctl.do_quotes(instr, &self.books, now);
            }
        }
    }

    /// Paper venues confirm cancels synchronously into a side queue;
    /// replay them through the normal event path.
    fn drain_paper_feedback(&mut self) {
        let drained: VecDeque<_> = std::mem::take(&mut *self.feedback.lock());
        for fb in drained {
            if let Some(h) = self.ctl.lookup_order(fb.venue, fb.venue_id) {
                self.ctl
                    .on_cancel_confirmed(h, &self.books, now_ms());
            }
        }
    }
}
