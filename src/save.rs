use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{
    MigrationId, Result, SENTINEL_MIGRATION_ID, SaveEnvelope, SaveError, SaveId,
};

/// A mutable persisted domain object.
///
/// Implementors only describe their payload; identity, dirty state and
/// migration bookkeeping live in the surrounding [`SaveCell`].
pub trait Save: Serialize + DeserializeOwned + Default + Send + 'static {
    /// Hook for seeding defaults on a freshly synthesized save.
    fn on_created(&mut self) {}
}

/// Routes a cell's change notification into the owning system's dirty
/// channel. All cells of one container share the same sink.
#[derive(Clone)]
pub(crate) struct ChangeSink {
    pub(crate) group: TypeId,
    pub(crate) tx: Sender<TypeId>,
}

impl ChangeSink {
    fn notify(&self) {
        // The receiver only disappears on system teardown.
        let _ = self.tx.send(self.group);
    }
}

/// A live save record: payload plus identity, dirty flag, just-created
/// flag and the migration id it was last written under.
///
/// Cells are shared as [`SaveRef`]s; the cache guarantees at most one
/// cell per (type, id), so `Arc` identity is save identity.
pub struct SaveCell<T: Save> {
    id: SaveId,
    dirty: AtomicBool,
    just_created: AtomicBool,
    migration_id: AtomicI32,
    sink: OnceLock<ChangeSink>,
    data: Mutex<T>,
}

/// Shared handle to a cached save.
pub type SaveRef<T> = Arc<SaveCell<T>>;

impl<T: Save> SaveCell<T> {
    /// Builds a cell for a save that does not exist in storage yet.
    pub(crate) fn new_created(id: SaveId) -> SaveRef<T> {
        let mut data = T::default();
        data.on_created();
        Arc::new(Self {
            id,
            dirty: AtomicBool::new(false),
            just_created: AtomicBool::new(true),
            migration_id: AtomicI32::new(SENTINEL_MIGRATION_ID),
            sink: OnceLock::new(),
            data: Mutex::new(data),
        })
    }

    /// Builds a cell around a payload decoded from storage.
    pub(crate) fn from_loaded(
        id: SaveId,
        migration_id: MigrationId,
        just_created: bool,
        data: T,
    ) -> SaveRef<T> {
        Arc::new(Self {
            id,
            dirty: AtomicBool::new(false),
            just_created: AtomicBool::new(just_created),
            migration_id: AtomicI32::new(migration_id),
            sink: OnceLock::new(),
            data: Mutex::new(data),
        })
    }

    pub fn id(&self) -> SaveId {
        self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// True until [`SaveCell::reset_just_created`] is called; application
    /// code uses it to seed defaults exactly once.
    pub fn just_created(&self) -> bool {
        self.just_created.load(Ordering::Acquire)
    }

    /// Highest migration id applied at last write, or the sentinel.
    pub fn saved_migration_id(&self) -> MigrationId {
        self.migration_id.load(Ordering::Acquire)
    }

    /// Shared read access to the payload.
    pub fn read(&self) -> Result<MutexGuard<'_, T>> {
        self.data.lock().map_err(SaveError::from)
    }

    /// Mutates the payload and marks the cell dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let result = {
            let mut data = self.data.lock()?;
            f(&mut data)
        };
        self.set_dirty();
        Ok(result)
    }

    /// Marks the cell dirty and fires the change notification on the
    /// clean-to-dirty transition.
    pub fn set_dirty(&self) {
        if !self.dirty.swap(true, Ordering::AcqRel) {
            if let Some(sink) = self.sink.get() {
                sink.notify();
            }
        }
    }

    pub fn reset_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Clears the just-created flag and marks the cell dirty so the
    /// seeded state is persisted.
    pub fn reset_just_created(&self) {
        self.just_created.store(false, Ordering::Release);
        self.set_dirty();
    }

    pub(crate) fn stamp_migration_id(&self, id: MigrationId) {
        self.migration_id.store(id, Ordering::Release);
    }

    pub(crate) fn attach_sink(&self, sink: ChangeSink) {
        let _ = self.sink.set(sink);
    }

    /// Serializes the cell into its persisted form. Runs on the caller
    /// thread during a drain, never concurrently with a mutation.
    pub(crate) fn to_envelope(&self) -> Result<SaveEnvelope> {
        let data = self.data.lock()?;
        let payload = serde_json::to_value(&*data).map_err(|e| {
            SaveError::Serialization(format!("Failed to serialize save {}: {}", self.id, e))
        })?;
        Ok(SaveEnvelope {
            id: self.id,
            migration_id: self.saved_migration_id(),
            just_created: self.just_created(),
            written_at: Utc::now(),
            data: payload,
        })
    }
}
