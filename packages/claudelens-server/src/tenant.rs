//! Identifier & Tenant Context (§4.1).
//!
//! Derives a [`Principal`] for an inbound request by trying, in order: a
//! hashed API key, a signed bearer token, then a loopback-origin fallback.
//! Mirrors the `TenantContext`/`verify_tenant_from_api_key` shape of the
//! original middleware, but typed: callers get an owned `Principal` rather
//! than a context object mutated in place.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claudelens_core::{AuthMethod, Principal, Role};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// One active API key as stored against a user.
#[derive(Debug, Clone)]
pub struct ApiKeyLookup {
    pub user_id: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub label: Option<String>,
}

/// Pluggable directory of hashed API keys. Implementations: Postgres-backed
/// in production, in-memory for tests.
#[async_trait]
pub trait ApiKeyDirectory: Send + Sync {
    /// Finds an active, non-expired key by its sha-256 hash.
    ///
    /// Timestamp comparisons MUST be UTC-aware (§4.1); `now` is passed in by
    /// the caller so tests can control it.
    async fn find_active(&self, key_hash: &str, now: DateTime<Utc>) -> Option<ApiKeyLookup>;

    /// Best-effort update of the key's `last_used` timestamp. Failure here
    /// MUST NOT fail the request that triggered it (§4.1).
    async fn touch_last_used(&self, key_hash: &str, now: DateTime<Utc>);
}

/// Claims encoded in a signed bearer token.
#[derive(Debug, Deserialize, Serialize)]
struct BearerClaims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

/// The credential material presented with a request, already extracted from
/// transport-layer headers by the (out-of-scope) endpoint layer.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredential {
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub is_loopback_origin: bool,
}

/// Resolves a [`Principal`] from presented credentials.
pub struct TenantResolver<D: ApiKeyDirectory> {
    directory: Arc<D>,
    token_signing_secret: String,
    trust_loopback_admin: bool,
}

impl<D: ApiKeyDirectory> TenantResolver<D> {
    #[must_use]
    pub fn new(directory: Arc<D>, token_signing_secret: String, trust_loopback_admin: bool) -> Self {
        Self {
            directory,
            token_signing_secret,
            trust_loopback_admin,
        }
    }

    /// Resolves the principal for one request, in the priority order of §4.1.
    ///
    /// Never fails: an unresolvable credential yields the anonymous
    /// principal and leaves the accept/reject decision to the caller.
    pub async fn resolve(&self, presented: &PresentedCredential) -> Principal {
        if let Some(key) = presented.api_key.as_deref() {
            if let Some(principal) = self.resolve_api_key(key).await {
                return principal;
            }
        }

        if let Some(token) = presented.bearer_token.as_deref() {
            if let Some(principal) = self.resolve_bearer_token(token) {
                return principal;
            }
        }

        if presented.is_loopback_origin && self.trust_loopback_admin {
            return Principal {
                user_id: "loopback-admin".to_string(),
                role: Role::Admin,
                permissions: Vec::new(),
                api_key_label: None,
                auth_method: AuthMethod::LoopbackTrusted,
            };
        }

        Principal::anonymous()
    }

    async fn resolve_api_key(&self, presented_key: &str) -> Option<Principal> {
        let key_hash = hex::encode(Sha256::digest(presented_key.as_bytes()));
        let now = Utc::now();
        let found = self.directory.find_active(&key_hash, now).await?;

        // Best-effort: failure to update last_used never fails the request.
        self.directory.touch_last_used(&key_hash, now).await;

        Some(Principal {
            user_id: found.user_id,
            role: found.role,
            permissions: found.permissions,
            api_key_label: found.label,
            auth_method: AuthMethod::ApiKey,
        })
    }

    fn resolve_bearer_token(&self, token: &str) -> Option<Principal> {
        if self.token_signing_secret.is_empty() {
            return None;
        }
        let key = DecodingKey::from_secret(self.token_signing_secret.as_bytes());
        let data = match decode::<BearerClaims>(token, &key, &Validation::default()) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "bearer token verification failed");
                return None;
            }
        };

        let role = match data.claims.role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };

        Some(Principal {
            user_id: data.claims.sub,
            role,
            permissions: data.claims.permissions,
            api_key_label: None,
            auth_method: AuthMethod::BearerToken,
        })
    }
}
