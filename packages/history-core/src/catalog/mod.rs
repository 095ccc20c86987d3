//! Entity catalog: registered entity types and their history exclusion markers.

mod entity_type;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use entity_type::{EntityType, PropertyDef, Relation};

use crate::error::{HistoryError, Result};

/// Registry of entity types.
///
/// Stores registered types with lookup by entity name.
/// Provides thread-safe registration and retrieval.
#[derive(Debug, Default)]
pub struct EntityCatalog {
    types: RwLock<HashMap<String, Arc<EntityType>>>,
}

impl EntityCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an entity type.
    ///
    /// # Arguments
    /// * `entity` - Entity type to register
    ///
    /// # Returns
    /// `Ok(Arc<EntityType>)` if successful, `Err(HistoryError)` if the name is
    /// already registered or the type is invalid.
    pub fn register(&self, entity: EntityType) -> Result<Arc<EntityType>> {
        entity.validate()?;

        let mut types = self.types.write().map_err(|_| HistoryError::LockPoisoned)?;
        if types.contains_key(&entity.name) {
            return Err(HistoryError::TypeAlreadyRegistered(entity.name));
        }

        let entity = Arc::new(entity);
        types.insert(entity.name.clone(), Arc::clone(&entity));
        Ok(entity)
    }

    /// Retrieves an entity type by name.
    pub fn get(&self, name: &str) -> Option<Arc<EntityType>> {
        let types = self.types.read().ok()?;
        types.get(name).cloned()
    }

    /// Resolves an entity type by name, failing with `TypeResolution`.
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityType>> {
        self.get(name).ok_or_else(|| HistoryError::TypeResolution {
            entity: name.to_string(),
        })
    }

    /// Checks if a type is registered.
    pub fn contains(&self, name: &str) -> bool {
        match self.types.read() {
            Ok(types) => types.contains_key(name),
            Err(_) => false,
        }
    }

    /// Returns `true` if the whole type is excluded from history.
    pub fn is_type_excluded(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.excluded_from_history)
    }

    /// Returns `true` if a property of a type is excluded from history.
    pub fn is_property_excluded(&self, entity: &str, property: &str) -> bool {
        self.get(entity).is_some_and(|e| e.is_excluded(property))
    }

    /// Returns all registered entity types sorted by name.
    pub fn entity_types(&self) -> Vec<Arc<EntityType>> {
        let types = match self.types.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        let mut entities: Vec<Arc<EntityType>> = types.values().cloned().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        entities
    }
}
