use async_trait::async_trait;
use crate::utils::{error::EngineResult, types::Entity};

/// Bulk provider of entities for the point store
#[async_trait]
pub trait PointSource: Send + Sync {
    /// Read every entity the source holds
    async fn load(&self) -> EngineResult<Vec<Entity>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}
