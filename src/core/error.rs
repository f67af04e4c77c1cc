use thiserror::Error;

use super::types::{MigrationId, SaveId};

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Save system is not initialized")]
    NotInitialized,

    #[error("Save system is already initialized")]
    AlreadyInitialized,

    #[error("Save type '{0}' is not registered")]
    TypeNotRegistered(String),

    #[error("Save '{0}' already contains an entry with id {1}")]
    DuplicateSaveId(String, SaveId),

    #[error("Migration chain for '{0}' is already registered")]
    MigrationAlreadyRegistered(String),

    #[error("Save '{name}' with id {id} was written under unknown migration {stored}")]
    MigrationSkew {
        name: String,
        id: SaveId,
        stored: MigrationId,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, SaveError>;


impl<T> From<std::sync::PoisonError<T>> for SaveError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
