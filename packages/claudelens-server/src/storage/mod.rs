//! The Rolling Partition Store (§4.3) and the project/session collections
//! that sit above it.
//!
//! Three in-memory, concurrent collections, following the teacher's
//! `ServerStorage`/`StorageEngine` trait shape generalized from a pluggable
//! key-value backend to typed per-entity stores: [`ProjectStore`],
//! [`SessionStore`], and [`MessageStore`] (the month-partitioned one). A
//! `postgres` feature would swap the in-memory backing for `sqlx`-backed
//! persistence without changing the trait surface -- not wired up here,
//! since every component in this workspace is built and tested against the
//! in-memory implementation.

pub mod message_store;
pub mod project_store;
pub mod session_store;

pub use message_store::{MessageStore, StorageMetrics};
pub use project_store::ProjectStore;
pub use session_store::SessionStore;
