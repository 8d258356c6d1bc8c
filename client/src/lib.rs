//! # Device Emulator Library
//!
//! This library emulates a field device talking to the power-spot server. The
//! device walks randomly from a starting position, reports its position and
//! receiver sensitivity at a fixed interval, and logs the signal strength the
//! server computes for the nearest power spot.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The TCP connection to the server:
//! - Periodic `status` updates and optional `ping` keep-alives
//! - Reassembly of server replies from the byte stream
//! - Tracking of the latest RSSI report
//!
//! ### Walk Module (`walk`)
//! Random-walk movement over the globe with a fixed step length.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Device, DeviceConfig};
//! use shared::Coords;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig {
//!         server: "127.0.0.1:6644".to_string(),
//!         start: Coords::new(50.08, 14.42),
//!         ..DeviceConfig::default()
//!     };
//!
//!     let mut device = Device::connect(config).await?;
//!     // Runs until the server closes the connection
//!     device.run(None).await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod walk;
