use poi_engine::engine::distance::{closer_than, cluster_spread, distance, within};
use poi_engine::utils::{request::DistanceKind, types::Point};
use proptest::prelude::*;

fn lon_lat() -> impl Strategy<Value = Point> {
    (-180.0f64..180.0, -89.0f64..89.0).prop_map(|(x, y)| Point::new(x, y))
}

fn plane() -> impl Strategy<Value = Point> {
    (-1.0e6f64..1.0e6, -1.0e6f64..1.0e6).prop_map(|(x, y)| Point::new(x, y))
}

proptest! {
    #[test]
    fn euclidean_distance_is_symmetric(a in plane(), b in plane()) {
        let ab = distance(&a, &b, DistanceKind::Euclidean).unwrap();
        let ba = distance(&b, &a, DistanceKind::Euclidean).unwrap();
        prop_assert_eq!(ab, ba);
        prop_assert!(ab >= 0.0);
    }

    #[test]
    fn geodesic_distance_is_symmetric(a in lon_lat(), b in lon_lat()) {
        let ab = distance(&a, &b, DistanceKind::Geodesic).unwrap();
        let ba = distance(&b, &a, DistanceKind::Geodesic).unwrap();
        prop_assert_eq!(ab, ba);
        prop_assert!(ab >= 0.0);
    }

    #[test]
    fn within_agrees_with_distance(a in plane(), b in plane(), radius in 0.0f64..2.0e6) {
        let d = distance(&a, &b, DistanceKind::Euclidean).unwrap();
        // Exact agreement away from the boundary
        prop_assume!((d - radius).abs() > 1e-6 * radius.max(1.0));
        prop_assert_eq!(within(&a, &b, radius, DistanceKind::Euclidean).unwrap(), d <= radius);
        prop_assert_eq!(closer_than(&a, &b, radius, DistanceKind::Euclidean).unwrap(), d < radius);
    }

    #[test]
    fn spread_of_pair_is_their_distance(a in plane(), b in plane()) {
        let spread = cluster_spread(&[a, b], DistanceKind::Euclidean).unwrap();
        let d = distance(&a, &b, DistanceKind::Euclidean).unwrap();
        prop_assert!((spread - d).abs() <= 1e-9 * d.max(1.0));
    }
}
