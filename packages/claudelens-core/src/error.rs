//! Crate-wide error kinds shared by every component of the data plane.
//!
//! Mirrors the Error Kinds enumerated for the system: validation, not-found,
//! authorization, rate-limiting, conflict, upstream, corruption, cancellation,
//! and a catch-all internal variant. Component-local operations return
//! `anyhow::Result` internally (see `storage`, `ingest`) and convert to
//! `CoreError` only at the boundary a caller observes.

use std::collections::BTreeMap;

/// Stable machine-readable error kind returned to a caller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {message}")]
    ValidationFailure {
        message: String,
        fields: BTreeMap<String, String>,
    },

    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("rate limited on axis {axis}, retry after {retry_after_secs}s")]
    RateLimited { axis: String, retry_after_secs: u64 },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("upstream failure: {message}")]
    UpstreamFailure { message: String },

    #[error("corruption detected at offset {offset}: {message}")]
    Corruption { offset: u64, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Stable machine code used by API responses, independent of the
    /// human-readable `Display` message.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailure { .. } => "validation_failure",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::Conflict { .. } => "conflict",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::Corruption { .. } => "corruption",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status code this error kind maps to, per spec §7.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationFailure { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Unauthorized => 401,
            Self::Forbidden { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::Conflict { .. } => 409,
            Self::UpstreamFailure { .. } => 502,
            Self::Corruption { .. } => 422,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
