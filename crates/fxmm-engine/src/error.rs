//! Error types for fxmm-engine.

use fxmm_core::ReqKind;
use thiserror::Error;

/// Engine error types.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Venue rejected {kind} request: {detail}")]
    Venue { kind: ReqKind, detail: String },

    #[error("Cancel-pending registry full")]
    RegistryFull,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
