//! The Restore Engine (§4.8): preview/validation passes, the apply pass
//! with conflict resolution and rollback, selective-mode selectors, and the
//! restore-job collection.

pub mod engine;
pub mod job_store;
pub mod journal;
pub mod preview;
pub mod selector;

pub use engine::{RestoreEngine, RestoreStats};
pub use job_store::RestoreJobStore;
pub use journal::{Collection, RollbackJournal};
pub use preview::{preview_archive, validate_archive, PreviewSection, RestorePreview, ValidationReport, CURRENT_ARCHIVE_VERSION};
pub use selector::RestoreSelector;
