// Unlock engine: step resolution, callback verification, and download
// token issue/redemption. Pure decisions live in `steps`; everything that
// touches the database or a provider lives in `verifier` and `issuer`.

pub mod issuer;
pub mod steps;
pub mod verifier;

pub use steps::{next_step, Step};

use thiserror::Error;

use crate::providers::ProviderError;

// Errors crossing from the engine into the web layer. Each variant maps to
// exactly one HTTP status and error code; anything not worth a distinct
// status collapses into Internal.
#[derive(Debug, Error)]
pub enum UnlockError {
    /// Bad input or an unmet precondition. Surfaces as HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// Unknown, expired, or already-consumed authorization state.
    #[error("invalid or expired authorization state")]
    InvalidState,

    /// One or more required provider actions failed. No step flags were
    /// set; the message lists what went wrong.
    #[error("required actions failed: {0}")]
    ActionsFailed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Gate is disabled or past its end date. Surfaces as HTTP 410.
    #[error("gate is closed")]
    GateClosed,

    /// Download token does not exist. Surfaces as HTTP 404.
    #[error("download token not found")]
    TokenNotFound,

    /// Download token exists but its lifetime has passed. Surfaces as 410.
    #[error("download token expired")]
    TokenExpired,

    /// Per-token or per-gate redemption allowance is spent. Surfaces as 429.
    #[error("download limit reached")]
    LimitExceeded,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
