//! Entity mapping metadata.
//!
//! Descriptors are computed once per entity type and shared read-only
//! afterwards. Registration is idempotent: when two callers race to register
//! the same type, the first descriptor stored is the one everybody uses.

use crate::error::{DbError, DbResult};
use crate::models::{Entity, EntityDescriptor, EntityType};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Supplies table and column mappings for entity types.
pub trait MetadataProvider: Send + Sync {
    fn describe(&self, entity: EntityType) -> DbResult<Arc<EntityDescriptor>>;

    fn table_name(&self, entity: EntityType) -> DbResult<String> {
        Ok(self.describe(entity)?.table.clone())
    }
}

/// In-memory mapping cache keyed by type.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    descriptors: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
    strict: bool,
}

impl MappingRegistry {
    /// Registry that maps unknown types on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that only describes types registered up front.
    pub fn strict() -> Self {
        Self {
            descriptors: RwLock::default(),
            strict: true,
        }
    }

    /// Register `T` eagerly, validating its mapping.
    pub fn register<T: Entity>(&self) -> DbResult<Arc<EntityDescriptor>> {
        self.insert(EntityType::of::<T>())
    }

    pub fn with<T: Entity>(self) -> DbResult<Self> {
        self.register::<T>()?;
        Ok(self)
    }

    pub fn is_registered(&self, entity: EntityType) -> bool {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&entity.id)
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, entity: EntityType) -> DbResult<Arc<EntityDescriptor>> {
        if let Some(existing) = self.lookup(entity) {
            return Ok(existing);
        }

        // Build outside the lock; mapping() is user code.
        let descriptor = (entity.mapping)();
        descriptor.validate()?;

        let mut map = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = map
            .entry(entity.id)
            .or_insert_with(|| {
                debug!(entity = entity.short_name(), table = %descriptor.table, "Registered entity mapping");
                Arc::new(descriptor)
            })
            .clone();
        Ok(stored)
    }

    fn lookup(&self, entity: EntityType) -> Option<Arc<EntityDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity.id)
            .cloned()
    }
}

impl MetadataProvider for MappingRegistry {
    fn describe(&self, entity: EntityType) -> DbResult<Arc<EntityDescriptor>> {
        if let Some(descriptor) = self.lookup(entity) {
            return Ok(descriptor);
        }
        if self.strict {
            return Err(DbError::schema(
                "Entity type is not registered",
                entity.short_name(),
            ));
        }
        self.insert(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::impl_entity;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Widget {
        id: i64,
        label: String,
    }

    impl_entity!(Widget, table = "widgets", key = "id", columns = ["label"]);

    #[derive(Debug, Serialize, Deserialize)]
    struct Broken {
        a: i64,
    }

    impl crate::models::Entity for Broken {
        fn mapping() -> EntityDescriptor {
            EntityDescriptor::builder("broken")
                .identity("a")
                .identity_as("b", "b")
                .build()
        }
    }

    #[test]
    fn test_lazy_registration() {
        let registry = MappingRegistry::new();
        assert!(registry.is_empty());
        let desc = registry.describe(EntityType::of::<Widget>()).unwrap();
        assert_eq!(desc.table, "widgets");
        assert_eq!(registry.table_name(EntityType::of::<Widget>()).unwrap(), "widgets");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = MappingRegistry::new();
        let first = registry.register::<Widget>().unwrap();
        let second = registry.describe(EntityType::of::<Widget>()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_strict_rejects_unregistered() {
        let registry = MappingRegistry::strict();
        let err = registry.describe(EntityType::of::<Widget>()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let registry = MappingRegistry::strict().with::<Widget>().unwrap();
        assert!(registry.describe(EntityType::of::<Widget>()).is_ok());
    }

    #[test]
    fn test_invalid_mapping_rejected() {
        let registry = MappingRegistry::new();
        assert!(registry.register::<Broken>().is_err());
        assert!(!registry.is_registered(EntityType::of::<Broken>()));
    }

    #[test]
    fn test_concurrent_first_use_shares_descriptor() {
        let registry = Arc::new(MappingRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.describe(EntityType::of::<Widget>()).unwrap())
            })
            .collect();
        let descs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(descs.iter().all(|d| Arc::ptr_eq(d, &descs[0])));
    }
}
