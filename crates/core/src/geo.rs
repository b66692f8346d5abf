//! Locations and the distance collaborator used by ranking.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Build a location, rejecting out-of-range or non-finite coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoreError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoreError::Validation(format!(
                "Latitude {latitude} must be within [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoreError::Validation(format!(
                "Longitude {longitude} must be within [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Read-only distance lookup consumed by the ranker.
pub trait DistanceProvider: Send + Sync {
    /// Distance between two locations in kilometres.
    fn distance_km(&self, from: Location, to: Location) -> f64;
}

/// Great-circle distance on a spherical Earth.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineDistance;

impl DistanceProvider for HaversineDistance {
    fn distance_km(&self, from: Location, to: Location) -> f64 {
        let lat1 = from.latitude.to_radians();
        let lat2 = to.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (to.longitude - from.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}
