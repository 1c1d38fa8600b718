//! Error taxonomy surfaced across the core boundary (see spec §7).
//!
//! Handler-local errors convert to a single outbound `error` frame sent
//! only to the offending session; they never mutate state. `TransportFailed`
//! is the one variant that is never shown to the sender — it drives the
//! disconnect path for the affected recipient instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("protected room")]
    Protected,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session gone")]
    Gone,

    #[error("transport failed")]
    TransportFailed,
}

impl CoreError {
    /// The `kind` string carried on the outbound `error` frame.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NotFound",
            CoreError::Forbidden(_) => "Forbidden",
            CoreError::Conflict(_) => "Conflict",
            CoreError::Protected => "Protected",
            CoreError::BadRequest(_) => "BadRequest",
            CoreError::Gone => "Gone",
            CoreError::TransportFailed => "TransportFailed",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
