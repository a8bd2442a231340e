use poi_engine::{
    Engine, EngineBuilder, EngineConfig, EngineError, EngineResult, RequestError,
    Entity, EntityId, Key, Value,
    JoinRequest, NearestRequest, Predicate, Field, Projection, DistanceKind,
    AggregateRequest, AggregateFunction, SpatialConfig,
    MemoryPointSource, init_test_logging,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn berlin_engine() -> Engine {
    let engine = EngineBuilder::new().build().unwrap();
    engine.bulk_load(&MemoryPointSource::berlin_sample()).await.unwrap();
    engine
}

/// Every entity in one partition, spaced one unit apart on a line
fn crowded_line(count: i64) -> Vec<Entity> {
    (0..count)
        .map(|i| Entity::new(i, i as f64, 0.0).with_partition("zone", 1))
        .collect()
}

#[tokio::test]
async fn test_bulk_load_populates_indexes() -> EngineResult<()> {
    init_test_logging();
    let engine = berlin_engine().await;

    assert_eq!(engine.len().await, 8);
    let stats = engine.stats().await;
    assert_eq!(stats.entities, 8);
    let zipcode = stats.partitions.iter().find(|p| p.dimension == "zipcode").unwrap();
    assert_eq!(zipcode.cardinality, 3);
    assert_eq!(zipcode.populated, 8);
    assert_eq!(stats.attributes[0].name, "rating");
    assert_eq!(stats.attributes[0].count, 8);

    Ok(())
}

#[tokio::test]
async fn test_bulk_load_rejects_duplicates_atomically() {
    let engine = berlin_engine().await;
    let source = MemoryPointSource::new(vec![Entity::new(100, 0.0, 0.0), Entity::new(1, 0.0, 0.0)]);

    match engine.bulk_load(&source).await {
        Err(EngineError::DuplicateId(id)) => assert_eq!(id, Key::Int(1)),
        _ => panic!("Expected DuplicateId error"),
    }
    assert_eq!(engine.len().await, 8);
    assert!(matches!(engine.get(&Key::Int(100)).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_snapshot_isolation() {
    let engine = berlin_engine().await;
    let before = engine.snapshot().await;

    engine.insert(Entity::new(9, 13.40, 52.52).with_partition("zipcode", 10115)).await.unwrap();
    engine.remove(&Key::Int(1)).await.unwrap();

    assert_eq!(before.len(), 8);
    assert!(before.get(&Key::Int(1)).is_ok());
    assert!(before.get(&Key::Int(9)).is_err());
    assert_eq!(before.partitions().bucket_len("zipcode", &Key::Int(10115)), 3);

    let after = engine.snapshot().await;
    assert_eq!(after.len(), 8);
    assert_eq!(after.partitions().bucket_len("zipcode", &Key::Int(10115)), 3);
    assert!(after.get(&Key::Int(9)).is_ok());
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let engine = berlin_engine().await;
    let id = EntityId::Int(3);

    let removed = engine.remove(&id).await.unwrap();
    assert_eq!(removed.name, "ALDI Nord Invalidenstr.");
    assert!(matches!(engine.get(&id).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.remove(&id).await, Err(EngineError::NotFound(_))));
    assert_eq!(engine.len().await, 7);
}

#[tokio::test]
async fn test_insert_rejects_duplicate_and_bad_coordinates() {
    let engine = berlin_engine().await;

    assert!(matches!(
        engine.insert(Entity::new(2, 0.0, 0.0)).await,
        Err(EngineError::DuplicateId(_))
    ));
    assert!(matches!(
        engine.insert(Entity::new(20, f64::NAN, 0.0)).await,
        Err(EngineError::InvalidCoordinate(_))
    ));
    assert_eq!(engine.len().await, 8);
}

#[tokio::test]
async fn test_pre_cancelled_join_is_tagged() {
    let engine = Engine::new(EngineConfig::default());
    engine.bulk_load(&MemoryPointSource::new(crowded_line(20))).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let request = JoinRequest::new().role("a", vec![]).role("b", vec![]).same_partition("zone", "a", "b");
    let result = engine.execute_join_with_cancel(request, cancel).await.unwrap();

    assert!(result.is_cancelled());
    assert!(result.is_empty());
    match result.into_complete() {
        Err(EngineError::Cancelled { partial_rows }) => assert_eq!(partial_rows, 0),
        _ => panic!("Expected Cancelled error"),
    }
}

#[tokio::test]
async fn test_pre_cancelled_aggregate_is_tagged() {
    let engine = Engine::new(EngineConfig::default());
    engine.bulk_load(&MemoryPointSource::new(crowded_line(20))).await.unwrap();
    let request = || {
        AggregateRequest::new()
            .group_by(Field::Partition("zone".to_string()))
            .function(AggregateFunction::Count)
    };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine.aggregate_with_cancel(request(), cancel).await.unwrap();
    assert!(result.is_cancelled());
    match result.into_complete() {
        Err(EngineError::Cancelled { partial_rows }) => assert_eq!(partial_rows, 0),
        _ => panic!("Expected Cancelled error"),
    }

    let result = engine
        .aggregate_with_deadline(request(), Duration::from_secs(60))
        .await
        .unwrap();
    assert!(!result.is_cancelled());
    assert_eq!(result.value(0, "count"), Some(&Value::Integer(20)));
}

#[tokio::test]
async fn test_join_deadline_returns_partial_rows() {
    let engine = Engine::new(EngineConfig::default());
    engine.bulk_load(&MemoryPointSource::new(crowded_line(1500))).await.unwrap();

    let request = JoinRequest::new()
        .role("a", vec![])
        .role("b", vec![])
        .same_partition("zone", "a", "b")
        .project(Projection::field("a", Field::Id))
        .project(Projection::field("b", Field::Id))
        .project(Projection::distance("a", "b"));
    let result = engine
        .execute_join_with_deadline(request, Duration::from_millis(5))
        .await
        .unwrap();

    assert!(result.is_cancelled());
    assert!(result.row_count() < 1500 * 1499);
}

#[tokio::test]
async fn test_concurrent_joins_share_snapshot() {
    let engine = Arc::new(berlin_engine().await);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let request = JoinRequest::new()
                .role("p1", vec![Predicate::category("ice_cream")])
                .role("p2", vec![Predicate::category("supermarket")])
                .same_partition("zipcode", "p1", "p2");
            engine.execute_join(request).await
        }));
    }
    engine.insert(Entity::new(50, 13.39, 52.53).with_category("kiosk")).await.unwrap();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        // (1,3) in 10115, (4,5) in 10119, (7,8) in 12043
        assert_eq!(result.row_count(), 3);
    }
}

#[tokio::test]
async fn test_unknown_attribute_aborts_join() {
    let engine = berlin_engine().await;
    let request = JoinRequest::new()
        .role("p1", vec![Predicate::equals(Field::Attribute("stars".to_string()), 5)])
        .role("p2", vec![]);

    match engine.execute_join(request).await {
        Err(EngineError::UnknownAttribute(name)) => assert_eq!(name, "stars"),
        _ => panic!("Expected UnknownAttribute error"),
    }
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_execution() {
    let engine = berlin_engine().await;
    let request = JoinRequest::new().role("p1", vec![]).role("p2", vec![]).within("p1", "p3", 100.0);

    match engine.execute_join(request).await {
        Err(EngineError::InvalidRequest(RequestError::UndefinedRole(alias))) => assert_eq!(alias, "p3"),
        _ => panic!("Expected UndefinedRole error"),
    }
}

#[tokio::test]
async fn test_nearest_returns_closest_in_order() {
    let engine = berlin_engine().await;
    let request = NearestRequest {
        x: 13.3958,
        y: 52.5310,
        k: 3,
        kind: Some(DistanceKind::Geodesic),
        predicates: vec![],
    };

    let result = engine.nearest(request).await.unwrap();

    assert_eq!(result.row_count(), 3);
    assert_eq!(result.value(0, "id"), Some(&Value::Integer(1)));
    assert_eq!(result.value(0, "distance"), Some(&Value::Float(0.0)));
    let distances: Vec<f64> = (0..3)
        .map(|row| result.value(row, "distance").and_then(Value::as_f64).unwrap())
        .collect();
    assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
    // Everything in Neukölln is kilometres away
    assert!(distances[2] < 1_000.0);
}

#[tokio::test]
async fn test_nearest_with_filter_and_errors() {
    let engine = berlin_engine().await;

    let request = NearestRequest {
        x: 13.4372,
        y: 52.4811,
        k: 10,
        kind: None,
        predicates: vec![Predicate::category("supermarket")],
    };
    let result = engine.nearest(request.clone()).await.unwrap();
    assert_eq!(result.row_count(), 3);
    assert_eq!(result.value(0, "id"), Some(&Value::Integer(8)));

    let zero = NearestRequest { k: 0, ..request };
    match engine.nearest(zero).await {
        Err(EngineError::InvalidRequest(RequestError::InvalidNeighbourCount(0))) => {}
        _ => panic!("Expected InvalidNeighbourCount error"),
    }
}

#[tokio::test]
async fn test_within_radius() {
    let engine = Engine::new(EngineConfig::default());
    engine.bulk_load(&MemoryPointSource::new(crowded_line(10))).await.unwrap();

    let result = engine.within_radius(4.0, 0.0, 2.0, None).await.unwrap();
    let ids: Vec<&Value> = (0..result.row_count()).filter_map(|row| result.value(row, "id")).collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(ids[0], &Value::Integer(4));
    assert!(ids.contains(&&Value::Integer(2)));
    assert!(ids.contains(&&Value::Integer(6)));

    match engine.within_radius(0.0, 0.0, -1.0, None).await {
        Err(EngineError::InvalidRequest(RequestError::InvalidRadius { radius, .. })) => assert_eq!(radius, -1.0),
        _ => panic!("Expected InvalidRadius error"),
    }
}

#[tokio::test]
async fn test_lookups_far_outside_the_grid() {
    let mut config = EngineConfig::default();
    config.spatial = SpatialConfig {
        cell_size: Some(0.01),
        full_scan_threshold: 0,
        ..SpatialConfig::default()
    };
    let engine = Engine::new(config);
    engine.bulk_load(&MemoryPointSource::new(crowded_line(10))).await.unwrap();

    let result = engine
        .within_radius(0.0, 0.0, 1e17, Some(DistanceKind::Euclidean))
        .await
        .unwrap();
    assert_eq!(result.row_count(), 10);

    let request = NearestRequest {
        x: -1e17,
        y: 0.0,
        k: 1,
        kind: Some(DistanceKind::Euclidean),
        predicates: vec![],
    };
    let result = engine.nearest(request).await.unwrap();
    assert_eq!(result.value(0, "id"), Some(&Value::Integer(0)));
}

#[test]
fn test_engine_without_async_test_harness() {
    let engine = Engine::new(EngineConfig::default());

    tokio_test::block_on(async {
        engine.insert(Entity::new("node/1", 1.0, 1.0).with_name("Späti")).await.unwrap();
        let entity = engine.get(&Key::from("node/1")).await.unwrap();
        assert_eq!(entity.name, "Späti");
        assert!(!engine.is_empty().await);
    });
}
