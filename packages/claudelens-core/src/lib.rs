//! `claudelens` core -- data model, tenant context, month-partition naming,
//! and hashing primitives shared by every data-plane component.
//!
//! - **Context** ([`context`]): `Principal`, `Role`, `RequestContext` for
//!   per-request identity and tracing.
//! - **Model** ([`model`]): `Project`, `Session`, `Message`,
//!   `BackupMetadata`, `RestoreJob`, `RateLimitRecord`.
//! - **Partition** ([`partition`]): month-partition naming and fan-out
//!   range enumeration (§4.3).
//! - **Hash** ([`hash`]): content hashing and streaming checksums.
//! - **Error** ([`error`]): the crate-wide `CoreError` kind.

pub mod context;
pub mod error;
pub mod hash;
pub mod model;
pub mod partition;

pub use context::{AuthMethod, Principal, RequestContext, Role};
pub use error::{CoreError, CoreResult};
pub use hash::{content_hash, RollingChecksum};
pub use model::{
    Attribution, BackupMetadata, BackupStatus, ConflictPolicy, ContentPayload, Message,
    MessageType, Project, RateLimitAxis, RateLimitRecord, RestoreJob, RestoreMode, RestoreStatus,
    Session, TokenUsage,
};
pub use partition::{default_window, partitions_in_range, PartitionKey, DEFAULT_WINDOW_DAYS};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
