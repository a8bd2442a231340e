use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    engine::{
        aggregator::{Aggregator, DefaultAggregator},
        candidate_generator::GeneratorOptions,
        distance,
        join_executor::{DefaultJoinExecutor, JoinExecutor},
        join_planner::{DefaultJoinPlanner, JoinPlanner},
        predicate::EntityFilter,
    },
    sources::PointSource,
    store::{Dataset, Neighbour},
    utils::{
        config::EngineConfig,
        error::{EngineError, EngineResult, RequestError},
        request::{AggregateRequest, DistanceKind, JoinRequest, NearestRequest},
        types::{ColumnMetadata, DataType, Entity, EntityId, Point, QueryResult, Row, Value},
    },
};

/// Main POI engine that coordinates the dataset and the query components.
///
/// Readers work on an `Arc` snapshot of the dataset taken under a short read
/// lock; writers mutate copy-on-write under the write lock, so in-flight
/// executions keep the state they started with.
pub struct Engine {
    /// Engine configuration
    config: EngineConfig,
    dataset: RwLock<Arc<Dataset>>,
    /// Join planner for request validation and planning
    join_planner: Arc<dyn JoinPlanner>,
    /// Join executor for plan execution
    join_executor: Arc<dyn JoinExecutor>,
    aggregator: Arc<dyn Aggregator>,
    /// Largest distance threshold seen so far, as f64 bits; 0 means none
    max_threshold: AtomicU64,
}

/// Summary of the dataset and its indexes
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub entities: usize,
    pub cell_size: f64,
    pub occupied_cells: usize,
    pub partitions: Vec<PartitionStats>,
    pub attributes: Vec<AttributeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub dimension: String,
    pub cardinality: usize,
    pub populated: usize,
    pub expected_bucket_size: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeSummary {
    pub name: String,
    pub count: usize,
    pub types: Vec<DataType>,
}

impl Engine {
    /// Create a new engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        let join_planner = Arc::new(DefaultJoinPlanner::new(config.query.default_distance));
        let join_executor = Arc::new(DefaultJoinExecutor::new(GeneratorOptions {
            strategy: config.query.candidate_strategy,
            spatial_pruning: config.query.spatial_pruning,
        }));
        let aggregator = Arc::new(DefaultAggregator::new(config.query.stddev));

        Self::with_components(config, join_planner, join_executor, aggregator)
    }

    /// Create an engine with custom components
    pub fn with_components(
        config: EngineConfig,
        join_planner: Arc<dyn JoinPlanner>,
        join_executor: Arc<dyn JoinExecutor>,
        aggregator: Arc<dyn Aggregator>,
    ) -> Self {
        let dataset = Dataset::new(&config.spatial);
        Self {
            config,
            dataset: RwLock::new(Arc::new(dataset)),
            join_planner,
            join_executor,
            aggregator,
            max_threshold: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state of the dataset; later writes do not affect it
    pub async fn snapshot(&self) -> Arc<Dataset> {
        self.dataset.read().await.clone()
    }

    pub async fn insert(&self, entity: Entity) -> EngineResult<EntityId> {
        let mut dataset = self.dataset.write().await;
        let inserted = Arc::make_mut(&mut dataset).insert(entity)?;
        Ok(inserted.id.clone())
    }

    /// Remove an entity; a missing id fails with `NotFound` and changes nothing
    pub async fn remove(&self, id: &EntityId) -> EngineResult<Arc<Entity>> {
        let mut dataset = self.dataset.write().await;
        if !dataset.store().contains(id) {
            return Err(EngineError::NotFound(id.clone()));
        }
        Arc::make_mut(&mut dataset).remove(id)
    }

    pub async fn get(&self, id: &EntityId) -> EngineResult<Arc<Entity>> {
        self.snapshot().await.get(id)
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    /// Load every entity from a source; the batch is applied all-or-nothing
    pub async fn bulk_load(&self, source: &dyn PointSource) -> EngineResult<usize> {
        let started = Instant::now();
        let entities = source.load().await?;

        let mut dataset = self.dataset.write().await;
        let count = Arc::make_mut(&mut dataset).bulk_insert(entities)?;
        info!(
            source = %source.describe(),
            count,
            total = dataset.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk load complete"
        );
        Ok(count)
    }

    /// Execute a join request to completion
    pub async fn execute_join(&self, request: JoinRequest) -> EngineResult<QueryResult> {
        self.execute_join_with_cancel(request, CancellationToken::new()).await
    }

    /// Execute a join request that stops early once `cancel` fires
    pub async fn execute_join_with_cancel(
        &self,
        request: JoinRequest,
        cancel: CancellationToken,
    ) -> EngineResult<QueryResult> {
        let snapshot = self.snapshot().await;
        let plan = self.join_planner.plan(request, &snapshot)?;
        let threshold = plan.max_threshold();

        let executor = self.join_executor.clone();
        let result = tokio::task::spawn_blocking(move || executor.execute(plan, &snapshot, &cancel))
            .await
            .map_err(|e| EngineError::Internal(format!("Join task failed: {}", e)))??;

        self.observe_threshold(threshold).await;
        Ok(result)
    }

    /// Execute a join request, cancelling it once `deadline` has elapsed
    pub async fn execute_join_with_deadline(
        &self,
        request: JoinRequest,
        deadline: Duration,
    ) -> EngineResult<QueryResult> {
        let cancel = CancellationToken::new();
        let timer = Self::arm_deadline(cancel.clone(), deadline);
        let result = self.execute_join_with_cancel(request, cancel).await;
        timer.abort();
        result
    }

    /// Compute grouped statistics to completion
    pub async fn aggregate(&self, request: AggregateRequest) -> EngineResult<QueryResult> {
        self.aggregate_with_cancel(request, CancellationToken::new()).await
    }

    pub async fn aggregate_with_cancel(
        &self,
        request: AggregateRequest,
        cancel: CancellationToken,
    ) -> EngineResult<QueryResult> {
        let snapshot = self.snapshot().await;
        let aggregator = self.aggregator.clone();
        tokio::task::spawn_blocking(move || aggregator.aggregate(request, &snapshot, &cancel))
            .await
            .map_err(|e| EngineError::Internal(format!("Aggregate task failed: {}", e)))?
    }

    pub async fn aggregate_with_deadline(
        &self,
        request: AggregateRequest,
        deadline: Duration,
    ) -> EngineResult<QueryResult> {
        let cancel = CancellationToken::new();
        let timer = Self::arm_deadline(cancel.clone(), deadline);
        let result = self.aggregate_with_cancel(request, cancel).await;
        timer.abort();
        result
    }

    /// The `k` entities closest to a point that pass the request predicates, nearest first
    pub async fn nearest(&self, request: NearestRequest) -> EngineResult<QueryResult> {
        if request.k == 0 {
            return Err(RequestError::InvalidNeighbourCount(request.k).into());
        }
        let kind = request.kind.unwrap_or(self.config.query.default_distance);
        let center = Point::new(request.x, request.y);
        distance::check_point(&center, kind)?;
        let filter = EntityFilter::compile(&request.predicates)?;

        let started = Instant::now();
        let snapshot = self.snapshot().await;
        filter.check_fields(&snapshot)?;
        let k = request.k;
        tokio::task::spawn_blocking(move || -> EngineResult<QueryResult> {
            let neighbours = snapshot
                .spatial()
                .nearest(snapshot.store(), &center, k, kind, |entity| Ok(filter.matches(entity)))?;
            Ok(Self::neighbour_result(&snapshot, neighbours, started))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Nearest task failed: {}", e)))?
    }

    /// Every entity within `radius` of a point, nearest first; the boundary is inclusive
    pub async fn within_radius(
        &self,
        x: f64,
        y: f64,
        radius: f64,
        kind: Option<DistanceKind>,
    ) -> EngineResult<QueryResult> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(RequestError::InvalidRadius {
                left: "origin".to_string(),
                right: "entity".to_string(),
                radius,
            }
            .into());
        }
        let kind = kind.unwrap_or(self.config.query.default_distance);
        let center = Point::new(x, y);
        distance::check_point(&center, kind)?;

        let started = Instant::now();
        let snapshot = self.snapshot().await;
        tokio::task::spawn_blocking(move || -> EngineResult<QueryResult> {
            let neighbours = snapshot.spatial().radius_query(snapshot.store(), &center, radius, kind)?;
            Ok(Self::neighbour_result(&snapshot, neighbours, started))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Radius task failed: {}", e)))?
    }

    /// Largest distance threshold observed by executed joins
    pub fn observed_threshold(&self) -> Option<f64> {
        match self.max_threshold.load(AtomicOrdering::Acquire) {
            0 => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Resize the spatial grid for the query history; false when the size is unchanged
    pub async fn retune_spatial_index(&self) -> bool {
        let cell_size = self.config.spatial.effective_cell_size(self.observed_threshold());
        let mut dataset = self.dataset.write().await;
        if dataset.spatial().cell_size() == cell_size {
            return false;
        }
        Arc::make_mut(&mut dataset).rebuild_spatial_index(cell_size)
    }

    pub async fn stats(&self) -> DatasetStats {
        let snapshot = self.snapshot().await;
        let partitions = snapshot.partitions();
        DatasetStats {
            entities: snapshot.len(),
            cell_size: snapshot.spatial().cell_size(),
            occupied_cells: snapshot.spatial().occupied_cells(),
            partitions: partitions
                .dimensions()
                .into_iter()
                .map(|dimension| PartitionStats {
                    cardinality: partitions.cardinality(&dimension),
                    populated: partitions.populated(&dimension),
                    expected_bucket_size: partitions.expected_bucket_size(&dimension),
                    dimension,
                })
                .collect(),
            attributes: snapshot
                .attributes()
                .iter()
                .map(|(name, stats)| AttributeSummary {
                    name: name.clone(),
                    count: stats.count,
                    types: stats.types.keys().copied().collect(),
                })
                .collect(),
        }
    }

    /// Record a join's distance threshold and retune the grid when it grew
    async fn observe_threshold(&self, threshold: Option<f64>) {
        let Some(threshold) = threshold.filter(|t| t.is_finite() && *t > 0.0) else {
            return;
        };
        // Bit patterns of non-negative floats order like the floats themselves
        let previous = self.max_threshold.fetch_max(threshold.to_bits(), AtomicOrdering::AcqRel);
        if threshold.to_bits() > previous && self.config.spatial.cell_size.is_none() {
            let retuned = self.retune_spatial_index().await;
            debug!(threshold, retuned, "distance threshold history grew");
        }
    }

    fn arm_deadline(cancel: CancellationToken, deadline: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            cancel.cancel();
        })
    }

    fn neighbour_result(dataset: &Dataset, neighbours: Vec<Neighbour>, started: Instant) -> QueryResult {
        let column = |name: &str, data_type: DataType| ColumnMetadata {
            name: name.to_string(),
            data_type,
            nullable: false,
        };

        let mut result = QueryResult::new();
        result.columns = vec![
            column("id", DataType::Text),
            column("name", DataType::Text),
            column("category", DataType::Text),
            column("x", DataType::Float),
            column("y", DataType::Float),
            column("distance", DataType::Float),
        ];
        result.rows = neighbours
            .into_iter()
            .filter_map(|neighbour| {
                let entity = dataset.store().entity(&neighbour.id)?;
                Some(Row::new(vec![
                    entity.id.to_value(),
                    Value::Text(entity.name.clone()),
                    Value::Text(entity.category.clone()),
                    Value::Float(entity.coordinates.x),
                    Value::Float(entity.coordinates.y),
                    Value::Float(neighbour.distance),
                ]))
            })
            .collect();
        result.execution_time = started.elapsed();
        result
    }
}

/// Builder for creating Engine instances
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    join_planner: Option<Arc<dyn JoinPlanner>>,
    join_executor: Option<Arc<dyn JoinExecutor>>,
    aggregator: Option<Arc<dyn Aggregator>>,
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self {
            config: None,
            join_planner: None,
            join_executor: None,
            aggregator: None,
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_join_planner(mut self, planner: Arc<dyn JoinPlanner>) -> Self {
        self.join_planner = Some(planner);
        self
    }

    pub fn with_join_executor(mut self, executor: Arc<dyn JoinExecutor>) -> Self {
        self.join_executor = Some(executor);
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Validate the configuration and build the engine, filling in default components
    pub fn build(self) -> EngineResult<Engine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let defaults = Engine::new(config);
        Ok(Engine::with_components(
            defaults.config,
            self.join_planner.unwrap_or(defaults.join_planner),
            self.join_executor.unwrap_or(defaults.join_executor),
            self.aggregator.unwrap_or(defaults.aggregator),
        ))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
