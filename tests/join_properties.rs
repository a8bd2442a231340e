use poi_engine::engine::{
    DefaultJoinExecutor, DefaultJoinPlanner, GeneratorOptions, JoinExecutor, JoinPlanner,
};
use poi_engine::store::Dataset;
use poi_engine::utils::{
    config::{CandidateStrategy, SpatialConfig},
    request::{DistanceKind, JoinRequest, Predicate},
    types::{Entity, Value},
};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

/// Entities on a 100x100 plane; some have no zone
fn dataset_strategy() -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(
        (0.0f64..100.0, 0.0f64..100.0, prop::option::of(0i64..3), prop::bool::ANY),
        0..24,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (x, y, zone, is_cafe))| {
                let entity = Entity::new(i as i64, x, y).with_category(if is_cafe { "cafe" } else { "shop" });
                match zone {
                    Some(zone) => entity.with_partition("zone", zone),
                    None => entity,
                }
            })
            .collect()
    })
}

/// Lon/lat points in central Berlin with an integer zone and a named district
fn berlin_strategy() -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(
        (
            13.30f64..13.50,
            52.45f64..52.55,
            prop::option::of(0i64..2),
            prop::option::of(prop::sample::select(vec!["mitte", "pankow", "neukoelln"])),
            prop::bool::ANY,
        ),
        0..20,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (lon, lat, zone, district, is_cafe))| {
                let mut entity = Entity::new(i as i64, lon, lat).with_category(if is_cafe { "cafe" } else { "shop" });
                if let Some(zone) = zone {
                    entity = entity.with_partition("zone", zone);
                }
                if let Some(district) = district {
                    entity = entity.with_partition("district", district);
                }
                entity
            })
            .collect()
    })
}

fn build_dataset(entities: Vec<Entity>) -> Dataset {
    build_dataset_with_cells(entities, 10.0)
}

fn build_dataset_with_cells(entities: Vec<Entity>, cell_size: f64) -> Dataset {
    let config = SpatialConfig {
        cell_size: Some(cell_size),
        full_scan_threshold: 0,
        ..SpatialConfig::default()
    };
    let mut dataset = Dataset::new(&config);
    for entity in entities {
        dataset.insert(entity).unwrap();
    }
    dataset
}

/// Run a join and return its id tuples in sorted order
fn run(request: &JoinRequest, dataset: &Dataset, strategy: CandidateStrategy, spatial_pruning: bool) -> Vec<Vec<i64>> {
    let plan = DefaultJoinPlanner::default().plan(request.clone(), dataset).unwrap();
    let executor = DefaultJoinExecutor::new(GeneratorOptions { strategy, spatial_pruning });
    let result = executor.execute(plan, dataset, &CancellationToken::new()).unwrap();

    let mut tuples: Vec<Vec<i64>> = result
        .rows
        .iter()
        .map(|row| {
            row.values
                .iter()
                .map(|value| match value {
                    Value::Integer(id) => *id,
                    other => panic!("Expected integer id, got {:?}", other),
                })
                .collect()
        })
        .collect();
    tuples.sort();
    tuples
}

fn triple_request(radius: f64) -> JoinRequest {
    JoinRequest::new()
        .role("a", vec![Predicate::category("cafe")])
        .role("b", vec![])
        .role("c", vec![])
        .same_partition("zone", "a", "b")
        .same_partition("zone", "b", "c")
        .within("a", "b", radius)
        .within("a", "c", radius * 1.5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn geodesic_indexed_join_matches_naive_join(entities in berlin_strategy(), meters in 50.0f64..4_000.0) {
        let dataset = build_dataset_with_cells(entities, 0.005);
        prop_assume!(dataset.partitions().has_dimension("zone"));
        prop_assume!(dataset.partitions().has_dimension("district"));
        let request = JoinRequest::new()
            .role("a", vec![Predicate::category("cafe")])
            .role("b", vec![])
            .role("c", vec![])
            .same_partition("district", "a", "b")
            .same_partition("zone", "b", "c")
            .within_using("a", "b", meters, DistanceKind::Geodesic)
            .within_using("b", "c", meters * 0.5, DistanceKind::Geodesic);

        let naive = run(&request, &dataset, CandidateStrategy::Naive, false);
        let indexed = run(&request, &dataset, CandidateStrategy::Indexed, false);
        let pruned = run(&request, &dataset, CandidateStrategy::Indexed, true);

        prop_assert_eq!(&indexed, &naive);
        prop_assert_eq!(&pruned, &naive);
    }

    #[test]
    fn indexed_join_matches_naive_join(entities in dataset_strategy(), radius in 1.0f64..60.0) {
        let dataset = build_dataset(entities);
        prop_assume!(dataset.partitions().has_dimension("zone"));
        let request = triple_request(radius);

        let naive = run(&request, &dataset, CandidateStrategy::Naive, false);
        let indexed = run(&request, &dataset, CandidateStrategy::Indexed, false);
        let pruned = run(&request, &dataset, CandidateStrategy::Indexed, true);

        prop_assert_eq!(&indexed, &naive);
        prop_assert_eq!(&pruned, &naive);
    }

    #[test]
    fn self_join_never_repeats_an_entity(entities in dataset_strategy()) {
        let dataset = build_dataset(entities);
        prop_assume!(dataset.partitions().has_dimension("zone"));
        let request = JoinRequest::new()
            .role("a", vec![])
            .role("b", vec![])
            .role("c", vec![])
            .same_partition("zone", "a", "b")
            .within("b", "c", 40.0);

        for tuple in run(&request, &dataset, CandidateStrategy::Indexed, true) {
            prop_assert_ne!(tuple[0], tuple[1]);
            prop_assert_ne!(tuple[0], tuple[2]);
            prop_assert_ne!(tuple[1], tuple[2]);
        }
    }

    #[test]
    fn partition_constraint_requires_populated_equal_zones(entities in dataset_strategy()) {
        let dataset = build_dataset(entities.clone());
        let request = JoinRequest::new().role("a", vec![]).role("b", vec![]).same_partition("zone", "a", "b");

        let expected = entities
            .iter()
            .flat_map(|a| entities.iter().map(move |b| (a, b)))
            .filter(|(a, b)| a.id != b.id && a.partition("zone").is_some() && a.partition("zone") == b.partition("zone"))
            .count();

        // An empty dataset has no zone dimension to constrain on
        if dataset.partitions().has_dimension("zone") {
            prop_assert_eq!(run(&request, &dataset, CandidateStrategy::Indexed, true).len(), expected);
        }
    }
}
