use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use crate::store::{
    attribute_catalog::AttributeCatalog,
    partition_index::PartitionIndex,
    point_store::{PointStore, StoreEvent, StoreObserver},
    spatial_index::SpatialIndex,
};
use crate::utils::{
    config::SpatialConfig,
    error::{EngineError, EngineResult},
    types::{Entity, EntityId},
};

/// Point store plus the indexes derived from it, always mutated together
#[derive(Debug, Clone)]
pub struct Dataset {
    store: PointStore,
    partitions: PartitionIndex,
    spatial: SpatialIndex,
    attributes: AttributeCatalog,
}

impl Dataset {
    pub fn new(config: &SpatialConfig) -> Self {
        Self {
            store: PointStore::new(),
            partitions: PartitionIndex::new(),
            spatial: SpatialIndex::new(config.effective_cell_size(None), config.full_scan_threshold),
            attributes: AttributeCatalog::new(),
        }
    }

    fn notify(&mut self, event: StoreEvent<'_>) {
        self.partitions.observe(event);
        self.spatial.observe(event);
        self.attributes.observe(event);
    }

    pub fn insert(&mut self, entity: Entity) -> EngineResult<Arc<Entity>> {
        let entity = self.store.insert(entity)?;
        self.notify(StoreEvent::Inserted(&entity));
        Ok(entity)
    }

    /// Insert a batch; nothing is inserted if any entity is rejected
    pub fn bulk_insert(&mut self, entities: Vec<Entity>) -> EngineResult<usize> {
        let mut seen = HashSet::with_capacity(entities.len());
        for entity in &entities {
            PointStore::check_insertable(entity)?;
            if self.store.contains(&entity.id) || !seen.insert(&entity.id) {
                return Err(EngineError::DuplicateId(entity.id.clone()));
            }
        }

        let count = entities.len();
        for entity in entities {
            self.insert(entity)?;
        }
        debug!(count, total = self.store.len(), "bulk insert applied");
        Ok(count)
    }

    pub fn remove(&mut self, id: &EntityId) -> EngineResult<Arc<Entity>> {
        let entity = self.store.remove(id)?;
        self.notify(StoreEvent::Removed(&entity));
        Ok(entity)
    }

    pub fn get(&self, id: &EntityId) -> EngineResult<Arc<Entity>> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn partitions(&self) -> &PartitionIndex {
        &self.partitions
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn attributes(&self) -> &AttributeCatalog {
        &self.attributes
    }

    /// Regrid with a new cell size; a no-op when the size is unchanged
    pub fn rebuild_spatial_index(&mut self, cell_size: f64) -> bool {
        if cell_size == self.spatial.cell_size() {
            return false;
        }
        self.spatial.rebuild(cell_size, &self.store);
        true
    }
}
