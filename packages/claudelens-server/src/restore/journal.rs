//! Rollback journal (§4.8 Apply pass / Rollback): records every mutation a
//! restore's apply pass makes so a failure can undo them. Grounded on the
//! same idea as [`crate::backup::archive`]'s fixed section order -- one
//! entry type per collection the apply pass touches.

use serde_json::Value;

/// One entity collection the restore apply pass can mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Project,
    Session,
    Message,
}

impl Collection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Session => "sessions",
            Self::Message => "messages",
        }
    }
}

/// `(collection, id)` pairs inserted during this restore, and pre-images of
/// anything overwritten or merged, as described in §4.8 Apply pass:
///
/// > For each inserted document, record `(collection, id)` in
/// > `inserted_ids`. For each overwritten or merged document, record the
/// > pre-image in `backup_data[collection][id]` before mutation.
#[derive(Debug, Default)]
pub struct RollbackJournal {
    inserted_ids: Vec<(Collection, String)>,
    pre_images: Vec<(Collection, String, Value)>,
}

impl RollbackJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&mut self, collection: Collection, id: impl Into<String>) {
        self.inserted_ids.push((collection, id.into()));
    }

    pub fn record_pre_image(&mut self, collection: Collection, id: impl Into<String>, pre_image: Value) {
        self.pre_images.push((collection, id.into(), pre_image));
    }

    #[must_use]
    pub fn inserted_ids(&self) -> &[(Collection, String)] {
        &self.inserted_ids
    }

    #[must_use]
    pub fn pre_images(&self) -> &[(Collection, String, Value)] {
        &self.pre_images
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted_ids.is_empty() && self.pre_images.is_empty()
    }
}
