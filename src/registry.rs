use std::any::TypeId;
use std::collections::HashMap;

use crate::core::SaveDescriptor;
use crate::save::Save;

/// Enumerates known save types and their persistence metadata.
pub trait SaveTypeRegistry: Send + Sync {
    fn descriptor(&self, type_id: TypeId) -> Option<&SaveDescriptor>;
    fn descriptors(&self) -> Vec<&SaveDescriptor>;
}

/// Registration table built explicitly at startup, one entry per save
/// type.
#[derive(Default)]
pub struct StaticSaveTypeRegistry {
    types: HashMap<TypeId, SaveDescriptor>,
}

impl StaticSaveTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent registration for startup wiring.
    pub fn with_save<T: Save>(mut self, descriptor: SaveDescriptor) -> Self {
        self.register::<T>(descriptor);
        self
    }

    pub fn register<T: Save>(&mut self, descriptor: SaveDescriptor) {
        if let Some(previous) = self.types.insert(TypeId::of::<T>(), descriptor) {
            log::warn!(
                "Save type '{}' was registered twice, keeping the later entry",
                previous.name()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl SaveTypeRegistry for StaticSaveTypeRegistry {
    fn descriptor(&self, type_id: TypeId) -> Option<&SaveDescriptor> {
        self.types.get(&type_id)
    }

    fn descriptors(&self) -> Vec<&SaveDescriptor> {
        self.types.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Default, Serialize, Deserialize)]
    struct Settings {
        volume: f32,
    }

    impl Save for Settings {}

    #[test]
    fn test_lookup_by_type() {
        let registry = StaticSaveTypeRegistry::new()
            .with_save::<Settings>(SaveDescriptor::new("settings").notify_user(false));
        let descriptor = registry.descriptor(TypeId::of::<Settings>()).unwrap();
        assert_eq!(descriptor.name(), "settings");
        assert!(!descriptor.requires_user_notification());
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn test_unknown_type_is_none() {
        let registry = StaticSaveTypeRegistry::new();
        assert!(registry.descriptor(TypeId::of::<Settings>()).is_none());
    }
}
