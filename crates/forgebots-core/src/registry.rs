//! Read-only registry of entity definitions, built once at startup.

use crate::entity::Entity;
use forgebots_lang::Capability;
use std::collections::HashMap;

/// Entity definitions indexed by name and by the capability a device
/// entity provides. When several entities claim the same capability the
/// last one registered wins; resolving that is a loading concern, not a
/// runtime one.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    by_name: HashMap<String, Entity>,
    by_capability: HashMap<Capability, Entity>,
}

impl EntityRegistry {
    /// Build the registry from loaded entity definitions.
    #[must_use]
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut registry = Self::default();
        for entity in entities {
            for capability in entity.capabilities().iter() {
                registry.by_capability.insert(capability, entity.clone());
            }
            registry.by_name.insert(entity.name().to_string(), entity);
        }
        registry
    }

    /// Look up a definition by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.by_name.get(name)
    }

    /// The device entity that most directly provides `capability`.
    #[must_use]
    pub fn device_for(&self, capability: Capability) -> Option<&Entity> {
        self.by_capability.get(&capability)
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
