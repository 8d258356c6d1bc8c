//! Per-connection device session
//!
//! A session owns its socket and waits on two sources at once: bytes from the
//! device and instructions from the world coordinator. Inbound bytes go
//! through a [`FrameDecoder`]; `ping` is answered on the spot, `status`
//! updates the session's own position and is forwarded to the coordinator,
//! whose RSSI reply comes back through the instruction queue and is written to
//! the socket.

use log::{debug, info, warn};
use shared::framing::FrameDecoder;
use shared::protocol::{self, DeviceMessage, ProtocolError, RssiReport, ServerMessage};
use shared::FramingError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::registry::{SessionId, SessionMailbox};
use crate::world::{SessionStatus, WorldError, WorldHandle};

const READ_BUFFER_SIZE: usize = 1024;

/// Instructions the coordinator posts to a session
#[derive(Debug)]
pub enum SessionInstruction {
    PowerSpotRssi(RssiReport),
    Terminate,
}

/// Tunables shared by every session
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Longest a single reply may take to write before the device is dropped
    pub write_timeout: Duration,
    /// Largest message a device may send, in bytes
    pub max_frame_len: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            max_frame_len: shared::framing::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Reasons a session closes its connection
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed frame: {0}")]
    Framing(#[from] FramingError),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("write stalled for more than {0:?}")]
    WriteStalled(Duration),
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Server side of one device connection
///
/// Reads device messages from the stream and instructions from its mailbox,
/// and is the only writer to the stream. Generic over the stream so tests
/// can drive it through in-memory pipes.
pub struct ClientSession<S> {
    id: SessionId,
    addr: SocketAddr,
    stream: S,
    world: WorldHandle,
    mailbox: SessionMailbox,
    decoder: FrameDecoder,
    status: SessionStatus,
    settings: SessionSettings,
    alive: bool,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session for an accepted connection
    ///
    /// `mailbox` must be the other half of the handle that was registered
    /// with `world` under the same `id`. The session starts without a known
    /// position and with an unlimited sensitivity range.
    pub fn new(
        id: SessionId,
        addr: SocketAddr,
        stream: S,
        world: WorldHandle,
        mailbox: SessionMailbox,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id,
            addr,
            stream,
            world,
            mailbox,
            decoder: FrameDecoder::with_max_frame_len(settings.max_frame_len),
            status: SessionStatus::default(),
            settings,
            alive: true,
        }
    }

    /// Last status the device reported
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Serves the device until it disconnects, misbehaves or is terminated
    ///
    /// Always closes the socket and deregisters from the coordinator before
    /// returning. Dropping `self` then signals completion to whoever waits on
    /// the session's handle.
    pub async fn run(mut self) {
        debug!("Session {} serving {}", self.id, self.addr);

        match self.serve().await {
            Ok(()) => {}
            Err(SessionError::Framing(e)) => {
                warn!("Session {}: dropping {} after malformed frame: {}", self.id, self.addr, e)
            }
            Err(SessionError::World(e)) => {
                warn!("Session {}: {}", self.id, e)
            }
            Err(e) => debug!("Session {}: connection lost: {}", self.id, e),
        }

        info!("Closing connection to {}", self.addr);
        if let Err(e) = self.stream.shutdown().await {
            debug!("Session {}: shutdown failed: {}", self.id, e);
        }
        // Fails only when the coordinator is already gone
        let _ = self.world.deregister(self.id);
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        while self.alive {
            tokio::select! {
                read = self.stream.read(&mut buffer) => {
                    let len = read?;
                    if len == 0 {
                        debug!("Session {}: end of stream", self.id);
                        break;
                    }
                    self.on_bytes(&buffer[..len]).await?;
                }
                instruction = self.mailbox.instructions.recv() => match instruction {
                    Some(instruction) => self.on_instruction(instruction).await?,
                    // Coordinator dropped our handle without terminating us
                    None => break,
                },
            }
        }
        Ok(())
    }

    async fn on_bytes(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        let frames: Vec<_> = self.decoder.feed(chunk).collect();

        for frame in frames {
            let value = frame?;
            debug!("Session {}: received {}", self.id, value);

            match DeviceMessage::from_value(value) {
                Ok(message) => self.on_message(message).await?,
                Err(ProtocolError::UnknownKind(kind)) => {
                    debug!("Session {}: ignoring `{}` message", self.id, kind)
                }
                Err(e) => warn!("Session {}: ignoring message: {}", self.id, e),
            }
        }
        Ok(())
    }

    /// Handles one message from the device
    pub async fn on_message(&mut self, message: DeviceMessage) -> Result<(), SessionError> {
        match message {
            DeviceMessage::Ping => self.send(&ServerMessage::Pong).await,
            DeviceMessage::Status { payload } => {
                self.status = SessionStatus {
                    coords: Some(payload.coords()),
                    sensitivity_range: payload.sensitivity_range,
                };
                self.world.report_status(self.id, self.status)?;
                Ok(())
            }
        }
    }

    /// Handles one instruction from the coordinator
    pub async fn on_instruction(&mut self, instruction: SessionInstruction) -> Result<(), SessionError> {
        debug!("Session {}: instruction {:?}", self.id, instruction);

        match instruction {
            SessionInstruction::PowerSpotRssi(report) => {
                self.send(&ServerMessage::PowerSpotRssi(report)).await
            }
            SessionInstruction::Terminate => {
                self.alive = false;
                Ok(())
            }
        }
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<(), SessionError> {
        let bytes = protocol::encode(message)?;
        debug!(
            "Session {}: sending {}",
            self.id,
            String::from_utf8_lossy(&bytes)
        );

        match tokio::time::timeout(self.settings.write_timeout, self.stream.write_all(&bytes)).await {
            Ok(written) => Ok(written?),
            Err(_) => Err(SessionError::WriteStalled(self.settings.write_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::session_channel;
    use crate::world::World;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;
    use shared::{fspl, PowerSpot};
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    fn test_addr() -> SocketAddr {
        "10.0.0.2:40000".parse().unwrap()
    }

    /// Starts a world with `spots` and one session wired to an in-memory pipe
    fn start(spots: Vec<PowerSpot>) -> (DuplexStream, WorldHandle, JoinHandle<()>, JoinHandle<()>) {
        let (world, handle) = World::new(spots);
        let world_task = world
            .with_drain_timeout(Duration::from_millis(500))
            .spawn();

        let (device, server_side) = tokio::io::duplex(4096);
        let (session_handle, mailbox) = session_channel(1, test_addr());
        handle.register(session_handle).unwrap();

        let session = ClientSession::new(
            1,
            test_addr(),
            server_side,
            handle.clone(),
            mailbox,
            SessionSettings::default(),
        );
        let session_task = tokio::spawn(session.run());
        (device, handle, world_task, session_task)
    }

    async fn read_reply(device: &mut DuplexStream, decoder: &mut FrameDecoder) -> ServerMessage {
        let mut buffer = [0u8; 256];
        loop {
            let len = tokio::time::timeout(Duration::from_secs(1), device.read(&mut buffer))
                .await
                .expect("timed out waiting for reply")
                .unwrap();
            assert!(len > 0, "session closed the connection");

            if let Some(frame) = decoder.feed(&buffer[..len]).next() {
                return serde_json::from_value(frame.unwrap()).unwrap();
            }
        }
    }

    async fn expect_closed(device: &mut DuplexStream) {
        let mut buffer = [0u8; 64];
        let len = tokio::time::timeout(Duration::from_secs(1), device.read(&mut buffer))
            .await
            .expect("session did not close the connection")
            .unwrap();
        assert_eq!(len, 0);
    }

    #[tokio::test]
    async fn test_ping_split_across_writes() {
        let (mut device, world, world_task, session_task) = start(vec![]);
        let mut decoder = FrameDecoder::new();

        device.write_all(b"{\"ty").await.unwrap();
        tokio::task::yield_now().await;
        device.write_all(b"pe\":\"pi").await.unwrap();
        tokio::task::yield_now().await;
        device.write_all(b"ng\"}").await.unwrap();

        assert_eq!(read_reply(&mut device, &mut decoder).await, ServerMessage::Pong);

        world.terminate().await.unwrap();
        session_task.await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_is_answered_with_rssi() {
        let (mut device, world, world_task, session_task) =
            start(vec![PowerSpot::new("tower", 0.0, 0.0, 20.0)]);
        let mut decoder = FrameDecoder::new();

        let status = json!({
            "type": "status",
            "payload": {"lat": 0.0, "lon": 0.001, "sensitivity-range": 10000.0}
        });
        device.write_all(status.to_string().as_bytes()).await.unwrap();

        match read_reply(&mut device, &mut decoder).await {
            ServerMessage::PowerSpotRssi(report) => {
                assert_eq!(report.name, "tower");
                assert_approx_eq!(report.distance, 111.2, 0.1);
                assert_approx_eq!(report.dbm, 20.0 - fspl(report.distance).unwrap(), 1e-9);
                assert_approx_eq!(report.dbm_threshold, -fspl(10000.0).unwrap(), 1e-9);
            }
            other => panic!("Unexpected reply: {:?}", other),
        }

        world.terminate().await.unwrap();
        session_task.await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_messages_are_ignored() {
        let (mut device, world, world_task, session_task) = start(vec![]);
        let mut decoder = FrameDecoder::new();

        device
            .write_all(br#"{"type":"battery","level":80}{"type":"status","payload":{}}{"no":"type"}"#)
            .await
            .unwrap();
        device.write_all(br#"{"type":"ping"}"#).await.unwrap();

        assert_eq!(read_reply(&mut device, &mut decoder).await, ServerMessage::Pong);

        world.terminate().await.unwrap();
        session_task.await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_only_this_session() {
        let (mut device, world, world_task, session_task) = start(vec![]);

        device.write_all(b"{this is not json}").await.unwrap();
        expect_closed(&mut device).await;
        session_task.await.unwrap();

        // The coordinator keeps serving
        assert!(world.list_power_spots().await.unwrap().is_empty());
        world.terminate().await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_closes_connection() {
        let (mut device, world, world_task, session_task) = start(vec![]);

        world.terminate().await.unwrap();
        expect_closed(&mut device).await;
        session_task.await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_device_disconnect_ends_session() {
        let (device, world, world_task, session_task) = start(vec![]);

        drop(device);
        tokio::time::timeout(Duration::from_secs(1), session_task)
            .await
            .expect("session should end on EOF")
            .unwrap();

        world.terminate().await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_scripted_exchange_until_eof() {
        let (world, handle) = World::new(vec![]);
        let world_task = world.spawn();
        let (session_handle, mailbox) = session_channel(4, test_addr());
        handle.register(session_handle).unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(b"garbage {\"type\":")
            .read(b"\"ping\"} trailing")
            .write(b"{\"type\":\"pong\"}")
            .build();
        let session = ClientSession::new(
            4,
            test_addr(),
            stream,
            handle.clone(),
            mailbox,
            SessionSettings::default(),
        );
        session.run().await;

        handle.terminate().await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_updates_session_state() {
        let (world, handle) = World::new(vec![]);
        let world_task = world.spawn();
        let (_device, server_side) = tokio::io::duplex(64);
        let (session_handle, mailbox) = session_channel(9, test_addr());
        handle.register(session_handle).unwrap();

        let mut session = ClientSession::new(
            9,
            test_addr(),
            server_side,
            handle.clone(),
            mailbox,
            SessionSettings::default(),
        );
        assert_eq!(session.status(), SessionStatus::default());

        let message = DeviceMessage::Status {
            payload: shared::StatusPayload {
                lat: 49.2,
                lon: 16.6,
                sensitivity_range: 300.0,
            },
        };
        session.on_message(message).await.unwrap();

        assert_eq!(session.status().coords, Some(shared::Coords::new(49.2, 16.6)));
        assert_eq!(session.status().sensitivity_range, 300.0);

        drop(session);
        handle.terminate().await.unwrap();
        world_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_write_ends_session() {
        let (world, handle) = World::new(vec![]);
        let world_task = world.spawn();
        // Tiny pipe that the device never reads
        let (_device, server_side) = tokio::io::duplex(8);
        let (session_handle, mailbox) = session_channel(2, test_addr());
        handle.register(session_handle).unwrap();

        let settings = SessionSettings {
            write_timeout: Duration::from_millis(50),
            ..SessionSettings::default()
        };
        let mut session =
            ClientSession::new(2, test_addr(), server_side, handle.clone(), mailbox, settings);

        let result = session.on_message(DeviceMessage::Ping).await;
        assert!(matches!(result, Err(SessionError::WriteStalled(_))));

        drop(session);
        handle.terminate().await.unwrap();
        world_task.await.unwrap();
    }
}
