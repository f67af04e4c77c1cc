use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a save within its type.
pub type SaveId = i64;

/// Ordering key of a migration rule.
pub type MigrationId = i32;

/// Marks a save written before any migration rule existed for its type.
pub const SENTINEL_MIGRATION_ID: MigrationId = -1;

/// File extension used by save types that do not declare their own.
pub const DEFAULT_SAVE_EXTENSION: &str = ".save";

/// Persistence metadata declared per save type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveDescriptor {
    name: String,
    extension: String,
    notify_user: bool,
}

impl SaveDescriptor {
    /// Creates a descriptor with the default extension and user
    /// notification enabled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: DEFAULT_SAVE_EXTENSION.to_string(),
            notify_user: true,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn notify_user(mut self, notify: bool) -> Self {
        self.notify_user = notify;
        self
    }

    /// Logical save name, used to derive storage keys and file names.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether writes of this type raise the save-in-progress notification.
    pub fn requires_user_notification(&self) -> bool {
        self.notify_user
    }
}

/// The persisted form of a single save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveEnvelope {
    pub id: SaveId,
    pub migration_id: MigrationId,
    pub just_created: bool,
    pub written_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// One pending-write unit handed to the storage backend during a drain.
#[derive(Debug, Clone)]
pub struct StagedSave {
    pub descriptor: SaveDescriptor,
    pub id: SaveId,
    pub envelope: SaveEnvelope,
}

impl StagedSave {
    /// Logical key used by backends to merge pending units.
    pub fn key(&self) -> (&str, SaveId) {
        (self.descriptor.name(), self.id)
    }
}
