use std::collections::BTreeMap;
use crate::store::point_store::{StoreEvent, StoreObserver};
use crate::utils::types::DataType;

/// Attribute names in use, with the number of entities carrying each
#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    attributes: BTreeMap<String, AttributeStats>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStats {
    pub count: usize,
    pub types: BTreeMap<DataType, usize>,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn stats(&self, name: &str) -> Option<&AttributeStats> {
        self.attributes.get(name)
    }

    /// Sorted attribute names
    pub fn names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeStats)> + '_ {
        self.attributes.iter()
    }
}

impl StoreObserver for AttributeCatalog {
    fn observe(&mut self, event: StoreEvent<'_>) {
        match event {
            StoreEvent::Inserted(entity) => {
                for (name, value) in &entity.attributes {
                    if value.is_null() {
                        continue;
                    }
                    let stats = self.attributes.entry(name.clone()).or_default();
                    stats.count += 1;
                    *stats.types.entry(value.data_type()).or_default() += 1;
                }
            }
            StoreEvent::Removed(entity) => {
                for (name, value) in &entity.attributes {
                    if value.is_null() {
                        continue;
                    }
                    let Some(stats) = self.attributes.get_mut(name) else {
                        continue;
                    };
                    stats.count = stats.count.saturating_sub(1);
                    let data_type = value.data_type();
                    if let Some(n) = stats.types.get_mut(&data_type) {
                        *n -= 1;
                        if *n == 0 {
                            stats.types.remove(&data_type);
                        }
                    }
                    if stats.count == 0 {
                        self.attributes.remove(name);
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.attributes.clear();
    }
}
