use crate::geo::Coords;
use serde::{Deserialize, Serialize};

/// A simulated radio transmitter with a fixed location and radiated power.
///
/// Spots are identified by `name`. The coordinator keeps names unique, so
/// adding a spot under an existing name replaces the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSpot {
    /// Identifier used by the admin interface and in RSSI reports
    pub name: String,
    /// Latitude in decimal degrees, within [-90, 90]
    pub lat: f64,
    /// Longitude in decimal degrees, within [-180, 180]
    pub lon: f64,
    /// Radiated power in dBm
    #[serde(rename = "radiation-strength", default)]
    pub radiation_strength: f64,
}

impl PowerSpot {
    /// Creates a spot without validating its coordinates
    ///
    /// Range checks happen when the spot is handed to the coordinator.
    pub fn new(name: impl Into<String>, lat: f64, lon: f64, radiation_strength: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lon,
            radiation_strength,
        }
    }

    /// Position of the spot as a [`Coords`] pair
    pub fn coords(&self) -> Coords {
        Coords::new(self.lat, self.lon)
    }
}

/// On-disk document holding the whole power-spot collection.
///
/// Serialized as `{"power-spots": [...]}`. A document without the key reads
/// as an empty collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotFile {
    /// Spots in insertion order
    #[serde(rename = "power-spots", default)]
    pub power_spots: Vec<PowerSpot>,
}
