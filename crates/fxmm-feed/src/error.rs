//! Error types for fxmm-feed.

use fxmm_core::BookId;
use thiserror::Error;

/// Feed error types.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid snapshot for {book}: {reason}")]
    InvalidSnapshot { book: BookId, reason: String },
}

/// Result type alias for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;
