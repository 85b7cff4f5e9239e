//! Quote pricing and order lifecycle.
//!
//! [`pricing`] turns an order book and a position into a price ladder;
//! [`lifecycle`] diffs the ladder against the live orders and drives
//! the two venues through the [`venue::OrderEntry`] trait. Covering
//! (inventory flattening) piggybacks on the same lifecycle machinery.

pub mod config;
pub mod covering;
pub mod error;
pub mod lifecycle;
pub mod pricing;
pub mod slots;
pub mod venue;

pub use config::{EngineConfig, InstrConfig};
pub use covering::{plan_cover, CoverPlan};
pub use error::{EngineError, EngineResult};
pub use lifecycle::{OrderLifecycleController, QuoteStatus};
pub use pricing::{compute_ladder, Ladder, LadderInputs, PricingError};
pub use slots::{CancelPendingRegistry, OrderLocation, OrderSlotTable, CANCEL_PENDING_CAP};
pub use venue::{NewOrderReq, OrderEntry, VenueKind};
