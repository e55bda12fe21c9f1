//! Geodesic distance and geofence evaluation for attendance capture.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean Earth radius in meters, used by the haversine distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees, south negative.
    pub latitude: f64,
    /// Longitude in decimal degrees, west negative.
    pub longitude: f64,
}

impl GeoPoint {
    /// Validates and constructs a coordinate pair.
    ///
    /// Rejects non-finite values and degrees outside the valid ranges, so a
    /// point that made it past the boundary can always be fed to
    /// [`distance_m`].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoreError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoreError::InvalidInput(format!(
                "latitude out of range: {latitude}"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoreError::InvalidInput(format!(
                "longitude out of range: {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Outcome of a geofence evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceCheck {
    /// Whether the candidate position is acceptable.
    pub valid: bool,
    /// Whether the distance was actually measured against a reference point.
    pub verified: bool,
    /// Measured distance in meters, present only when a reference exists.
    pub distance_m: Option<f64>,
}

impl GeofenceCheck {
    /// A passing check for sessions that never measured a distance.
    pub const fn unverified() -> Self {
        Self {
            valid: true,
            verified: false,
            distance_m: None,
        }
    }
}

/// Great-circle distance between two points in meters.
///
/// Haversine formula over a spherical Earth model. Symmetric in its
/// arguments and exactly zero for identical points.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi_a = a.latitude.to_radians();
    let phi_b = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    // Rounding can nudge h past 1 near antipodal points, which would NaN
    // the square root below.
    let h = ((d_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2))
    .min(1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Checks a candidate position against an optional reference point.
///
/// The boundary is inclusive: a candidate at exactly `allowed_radius_m`
/// passes. With no reference the check passes unverified, sessions without a
/// configured meeting point accept any reported position but record that no
/// distance was measured.
pub fn validate(
    candidate: GeoPoint,
    reference: Option<GeoPoint>,
    allowed_radius_m: f64,
) -> GeofenceCheck {
    match reference {
        Some(reference) => {
            let distance = distance_m(reference, candidate);
            GeofenceCheck {
                valid: distance <= allowed_radius_m,
                verified: true,
                distance_m: Some(distance),
            }
        }
        None => GeofenceCheck::unverified(),
    }
}
