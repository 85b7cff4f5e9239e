//! Error types for fxmm-risk.

use fxmm_core::Tenor;
use thiserror::Error;

/// Risk error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("No valuation source for tenor {0}")]
    NoValuationSource(Tenor),

    #[error("Cross book for tenor {0} not ready")]
    CrossBookNotReady(Tenor),
}

/// Result type alias for risk operations.
pub type RiskResult<T> = Result<T, RiskError>;
