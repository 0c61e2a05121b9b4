//! Great-circle geometry on a spherical Earth.

/// Mean Earth radius used for every distance in the crate, in miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.7613;

/// Haversine distance in miles between two `(lat, lon)` points given in degrees.
pub fn haversine(point1: (f64, f64), point2: (f64, f64)) -> f64 {
    let (lat1, lon1) = (point1.0.to_radians(), point1.1.to_radians());
    let (lat2, lon2) = (point2.0.to_radians(), point2.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * a.sqrt().min(1.0).asin()
}

/// Distance used for MW-mile accounting: coincident endpoints count as one mile.
pub fn mw_mile_distance(point1: (f64, f64), point2: (f64, f64)) -> f64 {
    let distance = haversine(point1, point2);
    if distance == 0.0 {
        1.0
    } else {
        distance
    }
}

/// Unit vector on the sphere for a `(lat, lon)` pair in degrees.
pub fn ll2uv(lat: f64, lon: f64) -> [f64; 3] {
    let (lat, lon) = (lat.to_radians(), lon.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Angle in radians between two unit vectors.
pub fn angular_distance(uv1: [f64; 3], uv2: [f64; 3]) -> f64 {
    let dot: f64 = uv1.iter().zip(uv2.iter()).map(|(a, b)| a * b).sum();
    dot.clamp(-1.0, 1.0).acos()
}

/// Pick the candidate closest to `target` by angular distance.
///
/// Candidates are `(key, lat, lon)`; ties go to the smallest key, so the
/// result does not depend on iteration order.
pub fn nearest<K: Copy + Ord>(
    target: (f64, f64),
    candidates: impl IntoIterator<Item = (K, f64, f64)>,
) -> Option<K> {
    let target_uv = ll2uv(target.0, target.1);
    let mut best: Option<(f64, K)> = None;
    for (key, lat, lon) in candidates {
        let angle = angular_distance(target_uv, ll2uv(lat, lon));
        best = match best {
            None => Some((angle, key)),
            Some((best_angle, best_key)) => {
                if angle < best_angle || (angle == best_angle && key < best_key) {
                    Some((angle, key))
                } else {
                    Some((best_angle, best_key))
                }
            }
        };
    }
    best.map(|(_, key)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_zero_for_identical_points() {
        assert_eq!(haversine((36.0155, -114.738), (36.0155, -114.738)), 0.0);
        assert_eq!(mw_mile_distance((36.0, -114.0), (36.0, -114.0)), 1.0);
    }

    #[test]
    fn haversine_matches_reference_distance() {
        // One degree of latitude along a meridian.
        let d = haversine((40.0, -100.0), (41.0, -100.0));
        let expected = EARTH_RADIUS_MILES * 1f64.to_radians();
        assert!((d - expected).abs() < 1e-9);
    }

    #[test]
    fn nearest_breaks_ties_by_smallest_key() {
        let candidates = vec![(7, 31.0, -100.0), (3, 31.0, -100.0), (9, 45.0, -80.0)];
        assert_eq!(nearest((31.1, -100.1), candidates), Some(3));
    }

    #[test]
    fn nearest_of_nothing_is_none() {
        let none: Vec<(u32, f64, f64)> = Vec::new();
        assert_eq!(nearest((0.0, 0.0), none), None);
    }
}
