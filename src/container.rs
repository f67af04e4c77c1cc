use std::any::Any;
use std::collections::HashMap;

use crate::core::{MigrationId, Result, SaveDescriptor, SaveError, SaveId, StagedSave};
use crate::save::{ChangeSink, Save, SaveRef};

/// All loaded saves of one type.
///
/// Every member shares the container's change sink, so any member's
/// dirty transition surfaces as a single group-level notification.
pub struct SaveContainer<T: Save> {
    descriptor: SaveDescriptor,
    saves: HashMap<SaveId, SaveRef<T>>,
    sink: ChangeSink,
    fully_loaded: bool,
}

impl<T: Save> SaveContainer<T> {
    pub(crate) fn new(descriptor: SaveDescriptor, sink: ChangeSink) -> Self {
        Self {
            descriptor,
            saves: HashMap::new(),
            sink,
            fully_loaded: false,
        }
    }

    pub fn contains(&self, id: SaveId) -> bool {
        self.saves.contains_key(&id)
    }

    pub fn get(&self, id: SaveId) -> Option<SaveRef<T>> {
        self.saves.get(&id).cloned()
    }

    pub fn all(&self) -> Vec<SaveRef<T>> {
        self.saves.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.saves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saves.is_empty()
    }

    /// Registers a save under its id and wires it into the group
    /// notification. A duplicate id is an error; the cache owns the
    /// one-instance-per-id guarantee.
    pub(crate) fn insert(&mut self, save: SaveRef<T>) -> Result<()> {
        if self.saves.contains_key(&save.id()) {
            return Err(SaveError::DuplicateSaveId(
                self.descriptor.name().to_string(),
                save.id(),
            ));
        }
        save.attach_sink(self.sink.clone());
        self.saves.insert(save.id(), save);
        Ok(())
    }

    pub(crate) fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub(crate) fn mark_fully_loaded(&mut self) {
        self.fully_loaded = true;
    }
}

/// Type-erased view of a container, held by the orchestrator.
pub(crate) trait AnyContainer: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Stamps the current migration id (when a chain is registered) and
    /// serializes every save of the group into pending-write units.
    fn stage_dirty(&self, stamp: Option<MigrationId>) -> Result<Vec<StagedSave>>;

    /// Batch dirty reset after a successful drain.
    fn reset_dirty(&self);
}

impl<T: Save> AnyContainer for SaveContainer<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn stage_dirty(&self, stamp: Option<MigrationId>) -> Result<Vec<StagedSave>> {
        let mut staged = Vec::with_capacity(self.saves.len());
        for save in self.saves.values() {
            if let Some(current) = stamp {
                save.stamp_migration_id(current);
            }
            staged.push(StagedSave {
                descriptor: self.descriptor.clone(),
                id: save.id(),
                envelope: save.to_envelope()?,
            });
        }
        Ok(staged)
    }

    fn reset_dirty(&self) {
        for save in self.saves.values() {
            save.reset_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::SaveCell;
    use serde::{Deserialize, Serialize};
    use std::any::TypeId;
    use std::sync::mpsc;

    #[derive(Default, Serialize, Deserialize)]
    struct Inventory {
        slots: u32,
    }

    impl Save for Inventory {}

    fn container() -> SaveContainer<Inventory> {
        let (tx, _rx) = mpsc::channel();
        SaveContainer::new(
            SaveDescriptor::new("inventory"),
            ChangeSink {
                group: TypeId::of::<Inventory>(),
                tx,
            },
        )
    }

    #[test]
    fn test_insert_and_get() {
        let mut container = container();
        container.insert(SaveCell::new_created(1)).unwrap();
        assert!(container.contains(1));
        assert!(container.get(2).is_none());
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut container = container();
        container.insert(SaveCell::new_created(1)).unwrap();
        let err = container.insert(SaveCell::new_created(1)).unwrap_err();
        assert!(matches!(err, SaveError::DuplicateSaveId(_, 1)));
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_batch_reset_dirty() {
        let mut container = container();
        for id in 0..3 {
            let save: SaveRef<Inventory> = SaveCell::new_created(id);
            save.set_dirty();
            container.insert(save).unwrap();
        }
        AnyContainer::reset_dirty(&container);
        assert!(container.all().iter().all(|save| !save.is_dirty()));
    }

    #[test]
    fn test_stage_dirty_stamps_migration_id() {
        let mut container = container();
        container.insert(SaveCell::new_created(7)).unwrap();
        let staged = container.stage_dirty(Some(4)).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id, 7);
        assert_eq!(staged[0].envelope.migration_id, 4);
        assert_eq!(container.get(7).unwrap().saved_migration_id(), 4);
    }
}
