mod file;
mod json;
mod msgpack;

pub use file::{EnvelopeCodec, FileSaveProvider};
pub use json::{JsonCodec, JsonSaveProvider};
pub use msgpack::{MsgpackCodec, MsgpackSaveProvider};

use crate::core::{Result, SaveDescriptor, SaveEnvelope, SaveId, StagedSave};
use crate::registry::SaveTypeRegistry;

/// Storage backend: serializes staged saves into a pending representation
/// and persists them durably.
///
/// `stage` runs on the caller thread so saves are never serialized while
/// they might still be mutated off-cycle; `write_staged` and
/// `any_staged_requires_notification` run on the writer thread. The
/// pending buffer is the only state shared between the two and holds at
/// most one unit per (name, id) key.
pub trait SaveProvider: Send + Sync {
    /// Computes paths or opens connections. Called once from
    /// `SavesSystem::initialize`.
    fn initialize(&self, registry: &dyn SaveTypeRegistry) -> Result<()>;

    /// Converts staged units into the backend's pending representation,
    /// merging by (name, id) key.
    fn stage(&self, staged: Vec<StagedSave>) -> Result<()>;

    /// Durably writes everything pending. An `Err` stops the writer
    /// permanently.
    fn write_staged(&self) -> Result<()>;

    /// Whether any pending unit belongs to a type that raises the
    /// save-in-progress notification.
    fn any_staged_requires_notification(&self) -> bool;

    /// Loads one save, or `None` when it does not exist yet.
    fn read(&self, descriptor: &SaveDescriptor, id: SaveId) -> Result<Option<SaveEnvelope>>;

    /// Loads every persisted save of a type.
    fn read_all(&self, descriptor: &SaveDescriptor) -> Result<Vec<SaveEnvelope>>;

    /// Closes handles. The final flush has already happened by the time
    /// this is called.
    fn dispose(&self) -> Result<()>;
}
