pub mod error;
pub mod types;

pub use error::{Result, SaveError};
pub use types::{
    DEFAULT_SAVE_EXTENSION, MigrationId, SENTINEL_MIGRATION_ID, SaveDescriptor, SaveEnvelope,
    SaveId, StagedSave,
};
