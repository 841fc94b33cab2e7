//! Geographic utilities.
//!
//! Distances use a spherical Earth of radius [`EARTH_RADIUS_M`] so that
//! session totals are reproducible across platforms.

use geo::{Bearing, Haversine, Point};

use crate::LocationSample;

/// Mean Earth radius in meters used for all distance calculations.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lat/lng pairs (degrees).
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Great-circle distance in meters between two samples.
pub fn haversine_distance(p1: &LocationSample, p2: &LocationSample) -> f64 {
    haversine_m(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Sum of distances between consecutive samples, in slice order.
pub fn polyline_length(points: &[LocationSample]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Initial bearing in degrees [0, 360) from `from` to `to`.
///
/// Used to derive a heading when the platform does not report one.
pub fn bearing(from: &LocationSample, to: &LocationSample) -> f64 {
    let origin = Point::new(from.longitude, from.latitude);
    let destination = Point::new(to.longitude, to.latitude);
    Haversine::bearing(origin, destination).rem_euclid(360.0)
}
