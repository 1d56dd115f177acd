//! Great-circle distance on a spherical Earth

use crate::domain::types::Coordinates;

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two positions in meters
///
/// Only latitude and longitude are used. The haversine term is clamped to
/// [0, 1] so rounding near antipodal points cannot push `sqrt(1 - a)` into NaN.
pub fn distance_m(a: &Coordinates, b: &Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Position `meters` due north of `origin` (negative goes south)
///
/// Along a meridian the haversine distance is exactly `R * Δφ`, which makes
/// this handy for laying out walks with known distances.
pub fn offset_north(origin: &Coordinates, meters: f64) -> Coordinates {
    let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
    Coordinates::new(origin.latitude + d_lat, origin.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} ± {tolerance}, got {actual}"
        );
    }

    #[test]
    fn test_coincident_points() {
        let p = Coordinates::new(-22.97169125014227, -45.5445299255431);
        assert_eq!(distance_m(&p, &p), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let a = Coordinates::new(0.0, 0.0);
        let b = Coordinates::new(1.0, 0.0);
        assert_close(distance_m(&a, &b), EARTH_RADIUS_M * PI / 180.0, 1e-6);
    }

    #[test]
    fn test_antipodal_points() {
        let a = Coordinates::new(0.0, 0.0);
        let b = Coordinates::new(0.0, 180.0);
        let d = distance_m(&a, &b);
        assert!(d.is_finite());
        assert_close(d, PI * EARTH_RADIUS_M, 1e-3);

        let north = Coordinates::new(90.0, 0.0);
        let south = Coordinates::new(-90.0, 0.0);
        assert_close(distance_m(&north, &south), PI * EARTH_RADIUS_M, 1e-3);
    }

    #[test]
    fn test_symmetric() {
        let a = Coordinates::new(-22.97169125014227, -45.5445299255431);
        let b = Coordinates::new(-22.96938896827124, -45.548962328443636);
        assert_eq!(distance_m(&a, &b), distance_m(&b, &a));
    }

    #[test]
    fn test_neighbouring_tour_stops() {
        // Rua Tremembé -> Rotatória do Horto, roughly 520 m apart
        let a = Coordinates::new(-22.97169125014227, -45.5445299255431);
        let b = Coordinates::new(-22.96938896827124, -45.548962328443636);
        let d = distance_m(&a, &b);
        assert!(d > 450.0 && d < 600.0, "unexpected distance {d}");
    }

    #[test]
    fn test_offset_north_round_trip() {
        let origin = Coordinates::new(-22.97, -45.545);
        assert_close(distance_m(&origin, &offset_north(&origin, 70.0)), 70.0, 1e-6);
        assert_close(distance_m(&origin, &offset_north(&origin, -30.0)), 30.0, 1e-6);
    }
}
