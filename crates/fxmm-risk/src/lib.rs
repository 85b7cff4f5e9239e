//! Stop controller, connectivity gate and position risk for fxmm.
//!
//! Everything here is consulted by the lifecycle controller before it
//! acts: `StopController` answers "may I still initiate orders",
//! `ConnectivityGate` drives the one-shot transition into steady
//! operating mode, and `RiskManager` tracks the semi-netted positions
//! the covering logic hedges against.

pub mod error;
pub mod gate;
pub mod position;
pub mod stop;

pub use error::{RiskError, RiskResult};
pub use gate::ConnectivityGate;
pub use position::{Leg, RiskManager, RiskMode, ValuationSource};
pub use stop::{SignalAction, StopController, StopPoll, StopReason};
