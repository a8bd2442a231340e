use std::collections::{BTreeMap, BTreeSet, HashMap};
use crate::store::point_store::{StoreEvent, StoreObserver};
use crate::utils::types::{Entity, EntityId, PartitionValue};

/// Equality index from (dimension, value) to the ids sharing that value
#[derive(Debug, Clone, Default)]
pub struct PartitionIndex {
    dimensions: HashMap<String, DimensionBuckets>,
}

#[derive(Debug, Clone, Default)]
struct DimensionBuckets {
    buckets: HashMap<PartitionValue, BTreeSet<EntityId>>,
    populated: usize,
}

impl PartitionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids with `value` for `dimension`; empty when none
    pub fn lookup(&self, dimension: &str, value: &PartitionValue) -> BTreeSet<EntityId> {
        self.bucket(dimension, value).cloned().unwrap_or_default()
    }

    /// Borrowed bucket for hot paths
    pub fn bucket(&self, dimension: &str, value: &PartitionValue) -> Option<&BTreeSet<EntityId>> {
        self.dimensions.get(dimension).and_then(|d| d.buckets.get(value))
    }

    pub fn bucket_len(&self, dimension: &str, value: &PartitionValue) -> usize {
        self.bucket(dimension, value).map_or(0, |b| b.len())
    }

    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.dimensions.contains_key(dimension)
    }

    /// Known dimensions, sorted
    pub fn dimensions(&self) -> Vec<String> {
        let mut dimensions: Vec<String> = self.dimensions.keys().cloned().collect();
        dimensions.sort();
        dimensions
    }

    /// Number of distinct values of a dimension
    pub fn cardinality(&self, dimension: &str) -> usize {
        self.dimensions.get(dimension).map_or(0, |d| d.buckets.len())
    }

    /// Number of entities with the dimension populated
    pub fn populated(&self, dimension: &str) -> usize {
        self.dimensions.get(dimension).map_or(0, |d| d.populated)
    }

    /// Mean bucket size of a dimension; used to order partition constraints
    pub fn expected_bucket_size(&self, dimension: &str) -> f64 {
        match self.dimensions.get(dimension) {
            Some(d) if !d.buckets.is_empty() => d.populated as f64 / d.buckets.len() as f64,
            _ => 0.0,
        }
    }

    /// Bucket sizes per value, ordered by value
    pub fn value_counts(&self, dimension: &str) -> BTreeMap<PartitionValue, usize> {
        self.dimensions
            .get(dimension)
            .map(|d| d.buckets.iter().map(|(v, ids)| (v.clone(), ids.len())).collect())
            .unwrap_or_default()
    }

    fn add(&mut self, entity: &Entity) {
        for (dimension, value) in &entity.partition_keys {
            let buckets = self.dimensions.entry(dimension.clone()).or_default();
            if buckets.buckets.entry(value.clone()).or_default().insert(entity.id.clone()) {
                buckets.populated += 1;
            }
        }
    }

    fn drop_entity(&mut self, entity: &Entity) {
        for (dimension, value) in &entity.partition_keys {
            let Some(buckets) = self.dimensions.get_mut(dimension) else {
                continue;
            };
            if let Some(ids) = buckets.buckets.get_mut(value) {
                if ids.remove(&entity.id) {
                    buckets.populated -= 1;
                }
                if ids.is_empty() {
                    buckets.buckets.remove(value);
                }
            }
            if buckets.buckets.is_empty() {
                self.dimensions.remove(dimension);
            }
        }
    }
}

impl StoreObserver for PartitionIndex {
    fn observe(&mut self, event: StoreEvent<'_>) {
        match event {
            StoreEvent::Inserted(entity) => self.add(entity),
            StoreEvent::Removed(entity) => self.drop_entity(entity),
        }
    }

    fn reset(&mut self) {
        self.dimensions.clear();
    }
}
