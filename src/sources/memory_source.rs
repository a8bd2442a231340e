use async_trait::async_trait;
use std::time::Duration;
use crate::sources::source_trait::PointSource;
use crate::utils::{error::EngineResult, types::Entity};

/// In-memory point source with an optional simulated load delay
#[derive(Debug, Clone, Default)]
pub struct MemoryPointSource {
    entities: Vec<Entity>,
    load_delay_ms: u64,
}

impl MemoryPointSource {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            load_delay_ms: 0,
        }
    }

    /// Create a source that sleeps before returning its entities
    pub fn with_delay(entities: Vec<Entity>, delay_ms: u64) -> Self {
        Self {
            entities,
            load_delay_ms: delay_ms,
        }
    }

    pub fn push(&mut self, entity: Entity) {
        self.entities.push(entity);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// A handful of Berlin points of interest in longitude/latitude
    pub fn berlin_sample() -> Self {
        let poi = |id: i64, name: &str, category: &str, lon: f64, lat: f64, zipcode: i64, rating: f64| {
            Entity::new(id, lon, lat)
                .with_name(name)
                .with_category(category)
                .with_partition("zipcode", zipcode)
                .with_partition("region", "Berlin")
                .with_attribute("rating", rating)
        };

        Self::new(vec![
            poi(1, "Eismanufaktur", "ice_cream", 13.3958, 52.5310, 10115, 4.6),
            poi(2, "Stadtbad Mitte", "swimming_pool", 13.3984, 52.5330, 10115, 4.1),
            poi(3, "ALDI Nord Invalidenstr.", "supermarket", 13.3920, 52.5301, 10115, 3.4),
            poi(4, "Gelato Fiore", "ice_cream", 13.4030, 52.5265, 10119, 4.3),
            poi(5, "ALDI Nord Brunnenstr.", "supermarket", 13.3983, 52.5355, 10119, 3.2),
            poi(6, "Stadtbad Neukölln", "swimming_pool", 13.4372, 52.4811, 12043, 4.5),
            poi(7, "Kiez Eis", "ice_cream", 13.4349, 52.4820, 12043, 4.0),
            poi(8, "Lidl Karl-Marx-Str.", "supermarket", 13.4361, 52.4795, 12043, 3.0),
        ])
    }
}

#[async_trait]
impl PointSource for MemoryPointSource {
    async fn load(&self) -> EngineResult<Vec<Entity>> {
        if self.load_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.load_delay_ms)).await;
        }
        Ok(self.entities.clone())
    }

    fn describe(&self) -> String {
        format!("memory ({} entities)", self.entities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_returns_entities() {
        let source = MemoryPointSource::berlin_sample();
        let entities = source.load().await.unwrap();

        assert_eq!(entities.len(), 8);
        assert!(entities.iter().all(|e| e.partition("zipcode").is_some()));
        assert_eq!(source.describe(), "memory (8 entities)");
    }

    #[tokio::test]
    async fn test_load_with_delay() {
        let source = MemoryPointSource::with_delay(vec![Entity::new(1, 0.0, 0.0)], 20);
        let start = std::time::Instant::now();
        let entities = source.load().await.unwrap();

        assert_eq!(entities.len(), 1);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
