//! Great-circle math
//!
//! Pure functions on spherical coordinates: forward azimuth, haversine
//! distance, and the shortest signed rotation between two compass angles.

use crate::types::{Coordinate, QiblaReading};

/// Mean Earth radius used by the haversine formula (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Wrap any angle into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Initial great-circle bearing from point 1 to point 2, in [0, 360).
///
/// Coincident points give `atan2(0, 0) = 0`, i.e. due north.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Haversine distance between two points (km)
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards sqrt(1 - a) against a drifting past 1.0 for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Shortest signed rotation taking `heading` onto `bearing`, in [-180, 180].
///
/// Positive values turn clockwise.
pub fn shortest_rotation(heading: f64, bearing: f64) -> f64 {
    (bearing - heading + 540.0).rem_euclid(360.0) - 180.0
}

/// Bearing and distance from `from` to `to`, with no heading yet
pub fn reading_between(from: Coordinate, to: Coordinate) -> QiblaReading {
    QiblaReading {
        heading_degrees: None,
        bearing_degrees: initial_bearing(from.latitude, from.longitude, to.latitude, to.longitude),
        distance_km: distance_km(from.latitude, from.longitude, to.latitude, to.longitude),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MECCA: (f64, f64) = (21.4225, 39.8262);
    const LONDON: (f64, f64) = (51.5074, -0.1278);

    #[test]
    fn test_coincident_points() {
        let b = initial_bearing(MECCA.0, MECCA.1, MECCA.0, MECCA.1);
        assert!(b.is_finite());
        assert!((0.0..360.0).contains(&b));
        assert!(distance_km(MECCA.0, MECCA.1, MECCA.0, MECCA.1).abs() < 1e-9);
    }

    #[test]
    fn test_london_to_mecca() {
        let b = initial_bearing(LONDON.0, LONDON.1, MECCA.0, MECCA.1);
        let d = distance_km(LONDON.0, LONDON.1, MECCA.0, MECCA.1);
        assert!((b - 119.5).abs() < 119.5 * 0.01, "bearing was {b}");
        assert!((d - 4820.0).abs() < 4820.0 * 0.01, "distance was {d}");
    }

    #[test]
    fn test_cardinal_bearings() {
        assert!((initial_bearing(0.0, 0.0, 10.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((initial_bearing(0.0, 0.0, 0.0, 10.0) - 90.0).abs() < 1e-9);
        assert!((initial_bearing(10.0, 0.0, 0.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((initial_bearing(0.0, 10.0, 0.0, 0.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_antipodal_points_are_finite() {
        let d = distance_km(0.0, 0.0, 0.0, 180.0);
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
        assert!(initial_bearing(0.0, 0.0, 0.0, 180.0).is_finite());
    }

    #[test]
    fn test_shortest_rotation() {
        assert!((shortest_rotation(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((shortest_rotation(10.0, 350.0) + 20.0).abs() < 1e-9);
        assert!((shortest_rotation(90.0, 90.0)).abs() < 1e-9);
        assert!((shortest_rotation(0.0, 180.0).abs() - 180.0).abs() < 1e-9);
        // Inputs outside [0, 360) still land in range
        let r = shortest_rotation(-30.0, 700.0);
        assert!((-180.0..=180.0).contains(&r));
        assert!((r - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(725.0), 5.0);
        let tiny = normalize_degrees(-1e-18);
        assert!((0.0..360.0).contains(&tiny));
    }

    #[test]
    fn test_reading_between() {
        let london = Coordinate::new(LONDON.0, LONDON.1).unwrap();
        let reading = reading_between(london, Coordinate::KAABA);
        assert_eq!(reading.heading_degrees, None);
        assert!(reading.distance_km > 4700.0 && reading.distance_km < 4900.0);
    }
}
