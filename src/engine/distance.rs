use std::f64::consts::PI;
use crate::utils::{
    error::{EngineError, EngineResult},
    request::DistanceKind,
    types::Point,
};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Length of one degree of latitude on the mean sphere
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * PI / 180.0;

// Relative band around r^2 where the squared comparison defers to the exact root
const SQUARED_COMPARE_EPSILON: f64 = 1e-12;

/// Axis-aligned rectangle in coordinate units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }

    /// Rectangle enclosing every point within `radius` of `center`.
    ///
    /// Geodesic radii are meters and are converted to degrees. Returns `None`
    /// when the rectangle would reach a pole or wrap the antimeridian, in
    /// which case callers must not prune spatially.
    pub fn around(center: &Point, radius: f64, kind: DistanceKind) -> Option<Envelope> {
        if !center.is_finite() || !radius.is_finite() || radius < 0.0 {
            return None;
        }
        match kind {
            DistanceKind::Euclidean => Some(Envelope {
                min_x: center.x - radius,
                min_y: center.y - radius,
                max_x: center.x + radius,
                max_y: center.y + radius,
            }),
            DistanceKind::Geodesic => {
                let delta_lat = radius / METERS_PER_DEGREE;
                let max_abs_lat = center.y.abs() + delta_lat;
                if max_abs_lat >= 89.0 {
                    return None;
                }
                let delta_lon = delta_lat / max_abs_lat.to_radians().cos();
                if center.x - delta_lon < -180.0 || center.x + delta_lon > 180.0 {
                    return None;
                }
                Some(Envelope {
                    min_x: center.x - delta_lon,
                    min_y: center.y - delta_lat,
                    max_x: center.x + delta_lon,
                    max_y: center.y + delta_lat,
                })
            }
        }
    }
}

/// Express a distance threshold in raw coordinate units, for grid sizing
pub fn threshold_in_coordinate_units(radius: f64, kind: DistanceKind) -> f64 {
    match kind {
        DistanceKind::Euclidean => radius,
        DistanceKind::Geodesic => radius / METERS_PER_DEGREE,
    }
}

/// Reject points the distance function cannot handle
pub fn check_point(point: &Point, kind: DistanceKind) -> EngineResult<()> {
    if !point.is_finite() {
        return Err(EngineError::InvalidCoordinate(format!(
            "non-finite coordinate ({}, {})",
            point.x, point.y
        )));
    }
    if kind == DistanceKind::Geodesic && (point.y.abs() > 90.0 || point.x.abs() > 180.0) {
        return Err(EngineError::InvalidCoordinate(format!(
            "longitude/latitude out of range ({}, {})",
            point.x, point.y
        )));
    }
    Ok(())
}

fn squared_euclidean(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

fn haversine(a: &Point, b: &Point) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    // Absolute differences keep the result bit-identical under argument swap
    let half_dlat = (lat2 - lat1).abs() / 2.0;
    let half_dlon = (b.x - a.x).abs().to_radians() / 2.0;

    let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Distance between two points; never negative or NaN
pub fn distance(a: &Point, b: &Point, kind: DistanceKind) -> EngineResult<f64> {
    check_point(a, kind)?;
    check_point(b, kind)?;

    Ok(match kind {
        DistanceKind::Euclidean => squared_euclidean(a, b).sqrt(),
        DistanceKind::Geodesic => haversine(a, b),
    })
}

/// `distance(a, b, kind) <= radius`, avoiding the square root for Euclidean distance
pub fn within(a: &Point, b: &Point, radius: f64, kind: DistanceKind) -> EngineResult<bool> {
    check_point(a, kind)?;
    check_point(b, kind)?;
    if radius.is_nan() || radius < 0.0 {
        return Ok(false);
    }

    Ok(match kind {
        DistanceKind::Euclidean => {
            let squared = squared_euclidean(a, b);
            let squared_radius = radius * radius;
            if squared < squared_radius * (1.0 - SQUARED_COMPARE_EPSILON) {
                true
            } else if squared > squared_radius * (1.0 + SQUARED_COMPARE_EPSILON) {
                false
            } else {
                squared.sqrt() <= radius
            }
        }
        DistanceKind::Geodesic => haversine(a, b) <= radius,
    })
}

/// `distance(a, b, kind) < radius`
pub fn closer_than(a: &Point, b: &Point, radius: f64, kind: DistanceKind) -> EngineResult<bool> {
    check_point(a, kind)?;
    check_point(b, kind)?;
    if radius.is_nan() || radius <= 0.0 {
        return Ok(false);
    }

    Ok(match kind {
        DistanceKind::Euclidean => {
            let squared = squared_euclidean(a, b);
            let squared_radius = radius * radius;
            if squared < squared_radius * (1.0 - SQUARED_COMPARE_EPSILON) {
                true
            } else if squared > squared_radius * (1.0 + SQUARED_COMPARE_EPSILON) {
                false
            } else {
                squared.sqrt() < radius
            }
        }
        DistanceKind::Geodesic => haversine(a, b) < radius,
    })
}

/// Maximum pairwise distance among a set of points (0 for fewer than two)
pub fn cluster_spread(points: &[Point], kind: DistanceKind) -> EngineResult<f64> {
    let mut spread: f64 = 0.0;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            spread = spread.max(distance(a, b, kind)?);
        }
    }
    Ok(spread)
}
