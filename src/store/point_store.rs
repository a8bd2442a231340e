use std::collections::BTreeMap;
use std::sync::Arc;
use crate::utils::{
    error::{EngineError, EngineResult},
    types::{Entity, EntityId},
};

/// Mutation notification forwarded to derived indexes
#[derive(Debug, Clone, Copy)]
pub enum StoreEvent<'a> {
    Inserted(&'a Entity),
    Removed(&'a Entity),
}

/// Derived state that follows point store mutations
pub trait StoreObserver: Send + Sync {
    /// Apply a single insert or remove
    fn observe(&mut self, event: StoreEvent<'_>);

    /// Drop all derived state ahead of a rebuild
    fn reset(&mut self);
}

/// Exclusive owner of entity data, keyed by id
#[derive(Debug, Clone, Default)]
pub struct PointStore {
    entities: BTreeMap<EntityId, Arc<Entity>>,
}

impl PointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity; fails on duplicate id or non-finite coordinates
    pub fn insert(&mut self, entity: Entity) -> EngineResult<Arc<Entity>> {
        Self::check_insertable(&entity)?;
        if self.entities.contains_key(&entity.id) {
            return Err(EngineError::DuplicateId(entity.id));
        }

        let entity = Arc::new(entity);
        self.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    /// Fetch an entity by id
    pub fn get(&self, id: &EntityId) -> EngineResult<Arc<Entity>> {
        self.entities
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    /// Borrow an entity by id without touching the reference count
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id).map(|e| e.as_ref())
    }

    /// All ids in ascending order
    pub fn all(&self) -> Vec<EntityId> {
        self.entities.keys().cloned().collect()
    }

    /// Iterate over entities in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values().map(|e| e.as_ref())
    }

    /// Remove an entity; a missing id leaves the store unchanged
    pub fn remove(&mut self, id: &EntityId) -> EngineResult<Arc<Entity>> {
        self.entities
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Validation shared by single and bulk inserts
    pub(crate) fn check_insertable(entity: &Entity) -> EngineResult<()> {
        if !entity.coordinates.is_finite() {
            return Err(EngineError::InvalidCoordinate(format!(
                "entity {} has non-finite coordinates ({}, {})",
                entity.id, entity.coordinates.x, entity.coordinates.y
            )));
        }
        Ok(())
    }
}
