//! Principal and tenant context threaded through every request.
//!
//! Generalizes a single `Principal`/`RequestContext` pair into the richer
//! identity the Ownership Resolver needs: a role, an explicit permission
//! set, and the method that established the identity (for audit and for
//! deciding whether `last_used` bookkeeping applies).

use serde::{Deserialize, Serialize};

/// Role assigned to an authenticated principal.
///
/// Admins bypass every ownership filter (§4.2); regular users only ever
/// see entities reachable from their own project set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

/// How a principal was established for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Matched a hashed, active, non-expired API key.
    ApiKey,
    /// Verified a signed bearer token.
    BearerToken,
    /// Loopback-origin development fallback (see `trust_loopback_admin` config).
    LoopbackTrusted,
    /// No method succeeded; the anonymous principal.
    Anonymous,
}

/// The authenticated (or anonymous) actor for one request or background job.
///
/// Bound once per request and threaded through every downstream filter;
/// never mutated after construction.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Opaque user identifier. Empty string for the anonymous principal.
    pub user_id: String,
    pub role: Role,
    pub permissions: Vec<String>,
    /// Human-readable label of the API key used, if any (for audit).
    pub api_key_label: Option<String>,
    pub auth_method: AuthMethod,
}

impl Principal {
    /// The anonymous principal: no identity was established for this request.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: String::new(),
            role: Role::User,
            permissions: Vec::new(),
            api_key_label: None,
            auth_method: AuthMethod::Anonymous,
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self.auth_method, AuthMethod::Anonymous)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

/// Per-request context carrying identity, tracing, and deadline information.
///
/// Threaded through the ingestion, query, backup, and restore pipelines.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    /// Distributed trace identifier for observability, propagated via `tracing`.
    pub trace_id: String,
    /// Wall-clock deadline for the request, honored by storage operations.
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
}

impl RequestContext {
    #[must_use]
    pub fn new(principal: Principal, trace_id: String) -> Self {
        Self {
            principal,
            trace_id,
            deadline: None,
        }
    }
}
