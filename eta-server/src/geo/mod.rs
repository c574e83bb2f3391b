//! Geospatial filtering over the stop list.

pub mod position;

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::kmb::types::Stop;

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle distance between two positions, in metres.
///
/// Non-finite coordinates yield an infinite distance, so a stop with a
/// mangled position sorts behind every real one and never passes a radius
/// filter.
pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
    if !a.latitude.is_finite()
        || !a.longitude.is_finite()
        || !b.latitude.is_finite()
        || !b.longitude.is_finite()
    {
        return f64::INFINITY;
    }
    let a = Point::new(a.longitude, a.latitude);
    let b = Point::new(b.longitude, b.latitude);
    a.haversine_distance(&b)
}

/// A stop annotated with its parsed position and distance from a query point.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedStop {
    pub stop: Stop,
    pub coordinates: Coordinates,
    pub distance_m: f64,
}

/// Stops within `radius_m` of `origin`, nearest first.
///
/// Stops whose coordinate strings do not parse are skipped.
pub fn stops_within_radius(stops: &[Stop], origin: Coordinates, radius_m: f64) -> Vec<LocatedStop> {
    let mut located: Vec<LocatedStop> = stops
        .iter()
        .filter_map(|stop| {
            let latitude: f64 = stop.lat.parse().ok()?;
            let longitude: f64 = stop.long.parse().ok()?;
            let coordinates = Coordinates::new(latitude, longitude);
            let distance = distance_m(origin, coordinates);
            (distance <= radius_m).then(|| LocatedStop {
                stop: stop.clone(),
                coordinates,
                distance_m: distance,
            })
        })
        .collect();

    located.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    located
}

/// Human-readable distance: metres below 1 km, one-decimal kilometres above.
pub fn format_distance(metres: f64) -> String {
    if metres < 1000.0 {
        format!("{}m", metres.round() as i64)
    } else {
        format!("{:.1}km", metres / 1000.0)
    }
}
