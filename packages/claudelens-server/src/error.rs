//! Server-boundary error type.
//!
//! Thin wrapper around [`claudelens_core::CoreError`] for errors that only
//! arise once I/O, network, or remote-service concerns enter the picture
//! (upstream pricing table fetch, archive corruption, cancellation). Mirrors
//! the teacher's split between a typed `OperationError` boundary and
//! `anyhow::Result` used internally by individual components.

use claudelens_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServerError {
    /// Stable machine code surfaced to callers, per spec §7.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.code(),
            Self::Io(_) => "internal",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status code this error kind maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Core(e) => e.status_code(),
            Self::Io(_) | Self::Internal(_) => 500,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
