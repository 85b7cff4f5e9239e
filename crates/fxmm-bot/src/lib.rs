//! Dual-venue FX market-making bot.
//!
//! Wires the engine, feed and risk crates into a single-task event
//! loop with paper venues for dry runs.

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod paper;

pub use app::{Application, BotEvent};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
