//! Types and algorithms shared by the power-spot server and the device
//! emulator: the wire protocol, the stream framer, the power-spot record and
//! the geo/RF model.

pub mod framing;
pub mod geo;
pub mod protocol;
pub mod spot;

pub use framing::{FrameDecoder, FramingError};
pub use geo::{distance, fspl, rssi, Coords, RfError};
pub use protocol::{DeviceMessage, ProtocolError, RssiReport, ServerMessage, StatusPayload};
pub use spot::{PowerSpot, SpotFile};

/// TCP port devices connect to by default.
pub const DEFAULT_DEVICE_PORT: u16 = 6644;
/// HTTP port of the administrative interface by default.
pub const DEFAULT_ADMIN_PORT: u16 = 8080;
