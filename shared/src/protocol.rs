//! Messages exchanged over the device link.
//!
//! Every message is a single JSON object carrying a `type` discriminator.
//! Devices send [`DeviceMessage`]s, the server answers with
//! [`ServerMessage`]s. Framing on the byte stream is handled separately by
//! [`crate::framing`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::geo::Coords;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message has no string `type` field")]
    MissingType,
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("invalid `{kind}` message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Position and receiver sensitivity reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub lat: f64,
    pub lon: f64,
    /// Maximum distance in meters at which the device still hears a spot
    #[serde(rename = "sensitivity-range")]
    pub sensitivity_range: f64,
}

impl StatusPayload {
    pub fn coords(&self) -> Coords {
        Coords::new(self.lat, self.lon)
    }
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeviceMessage {
    Ping,
    Status { payload: StatusPayload },
}

impl DeviceMessage {
    const KINDS: [&'static str; 2] = ["ping", "status"];

    /// Interprets a decoded frame as a device message.
    ///
    /// Distinguishes frames of an unknown kind, which callers may skip, from
    /// known kinds with missing or mistyped fields.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => return Err(ProtocolError::MissingType),
        };
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownKind(kind));
        }
        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields { kind, source })
    }
}

/// Signal report computed by the server for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RssiReport {
    #[serde(rename = "dBm")]
    pub dbm: f64,
    #[serde(rename = "dBm-threshold")]
    pub dbm_threshold: f64,
    /// Distance to the spot in meters
    pub distance: f64,
    pub name: String,
}

impl RssiReport {
    /// Whether the signal is strong enough for the device to register it.
    pub fn is_receivable(&self) -> bool {
        self.dbm >= self.dbm_threshold
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Pong,
    PowerSpotRssi(RssiReport),
}

/// Serializes a message into the bytes of one frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}
