//! Entity registry keyed by instance identity.
//!
//! Entries live as long as the registry. There is no expiry; owners that
//! need a fresh entity for a key call [`EntityRegistry::clear`].

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::QpmError;
use crate::sink::{Entity, TelemetrySink};

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, Entity>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached entity for `key`, asking `sink` to create it once.
    pub fn get_or_create(
        &self,
        key: &str,
        entity_type: &str,
        sink: &dyn TelemetrySink,
    ) -> Result<Entity, QpmError> {
        if let Some(entity) = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(entity.clone());
        }

        let created = sink.entity(key, entity_type)?;
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entities.entry(key.to_string()).or_insert(created).clone())
    }

    /// Drops every cached entity.
    pub fn clear(&self) {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{INSTANCE_ENTITY_TYPE, MemorySink};

    #[test]
    fn entity_is_created_once_per_key() {
        let sink = MemorySink::new();
        let registry = EntityRegistry::new();
        let a = registry
            .get_or_create("db:5432", INSTANCE_ENTITY_TYPE, &sink)
            .unwrap();
        let b = registry
            .get_or_create("db:5432", INSTANCE_ENTITY_TYPE, &sink)
            .unwrap();
        registry
            .get_or_create("db:5433", INSTANCE_ENTITY_TYPE, &sink)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(sink.entities_created(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clear_forces_recreation() {
        let sink = MemorySink::new();
        let registry = EntityRegistry::new();
        registry
            .get_or_create("db:5432", INSTANCE_ENTITY_TYPE, &sink)
            .unwrap();
        registry.clear();
        assert!(registry.is_empty());
        registry
            .get_or_create("db:5432", INSTANCE_ENTITY_TYPE, &sink)
            .unwrap();
        assert_eq!(sink.entities_created(), 2);
    }
}
