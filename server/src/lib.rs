//! # Power-Spot Server Library
//!
//! This library provides the server side of the power-spot emulator. Emulated
//! devices connect over TCP, report where they are, and receive back the
//! received signal strength of the nearest simulated transmitter (a "power
//! spot").
//!
//! ## Core Responsibilities
//!
//! ### Authoritative World State
//! The set of power spots and the registry of connected sessions live inside a
//! single coordinator task. Every read and write is an instruction processed
//! to completion before the next one, so no reader ever observes a partially
//! updated list.
//!
//! ### Session Handling
//! Each device connection runs in its own task which:
//! - Reassembles JSON messages from arbitrarily fragmented reads
//! - Answers `ping` directly
//! - Forwards `status` updates to the coordinator
//! - Writes the coordinator's RSSI reports back to the device
//!
//! ### Administration
//! Power spots can be added, replaced, deleted and listed at runtime through a
//! small HTTP interface. Changes are optionally persisted to a JSON file.
//!
//! ## Module Organization
//!
//! ### World Module (`world`)
//! The coordinator task, its instruction set and the nearest-spot RSSI
//! computation.
//!
//! ### Registry Module (`registry`)
//! Coordinator-side bookkeeping of live sessions and the channels that link
//! each session to the coordinator.
//!
//! ### Session Module (`session`)
//! The per-connection loop, generic over the underlying stream.
//!
//! ### Network Module (`network`)
//! TCP accept loop that registers and spawns sessions.
//!
//! ### Admin Module (`admin`)
//! `axum` routes mapped onto world commands.
//!
//! ### Config Module (`config`)
//! Loading and saving the power-spot file.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::session::SessionSettings;
//! use server::world::World;
//! use shared::PowerSpot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (world, handle) = World::new(vec![PowerSpot::new("tower", 50.08, 14.42, 20.0)]);
//!     let world_task = world.spawn();
//!
//!     let server = Server::bind("0.0.0.0:6644", handle.clone(), SessionSettings::default()).await?;
//!     tokio::select! {
//!         result = server.run() => result?,
//!         _ = tokio::signal::ctrl_c() => {}
//!     }
//!
//!     // Closes every device connection, then stops the coordinator
//!     handle.terminate().await?;
//!     world_task.await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod config;
pub mod network;
pub mod registry;
pub mod session;
pub mod world;
