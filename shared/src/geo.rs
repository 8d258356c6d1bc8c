//! Great-circle distance and free-space path loss.
//!
//! Every RSSI value the server reports comes out of the two functions in this
//! module. Distances are measured on a sphere of mean Earth radius and the
//! path loss is evaluated at the fixed 868 MHz carrier of the emulated radios.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Carrier frequency of the emulated radios in Hz.
pub const FREQUENCY_HZ: f64 = 868e6;
/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_009.0;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum RfError {
    #[error("path loss is undefined for distance {0} m")]
    NonPositiveDistance(f64),
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
}

impl Coords {
    /// Creates a point from latitude and longitude in decimal degrees
    ///
    /// No range check is made here.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle surface distance between two points in meters.
///
/// Uses the haversine formulation, which is exactly symmetric in its
/// arguments and returns exactly zero for coincident points.
pub fn distance(a: Coords, b: Coords) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let half_dlat = (b.lat - a.lat).to_radians() / 2.0;
    let half_dlon = (b.lon - a.lon).to_radians() / 2.0;

    let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Frequency-dependent part of the FSPL formula, in dB.
fn fspl_constant() -> f64 {
    20.0 * FREQUENCY_HZ.log10() + 20.0 * (4.0 * PI / SPEED_OF_LIGHT).log10()
}

/// Free-space path loss in dB over `d` meters at [`FREQUENCY_HZ`].
///
/// Fails for `d <= 0` (and NaN) instead of returning `-inf`.
pub fn fspl(d: f64) -> Result<f64, RfError> {
    if d.is_nan() || d <= 0.0 {
        return Err(RfError::NonPositiveDistance(d));
    }
    Ok(20.0 * d.log10() + fspl_constant())
}

/// Signal strength in dBm received `d` meters away from a transmitter
/// radiating `strength_dbm`.
pub fn rssi(strength_dbm: f64, d: f64) -> Result<f64, RfError> {
    Ok(strength_dbm - fspl(d)?)
}
