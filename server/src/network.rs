//! Server network layer accepting device connections over TCP

use crate::registry::{session_channel, SessionId};
use crate::session::{ClientSession, SessionSettings};
use crate::world::{WorldError, WorldHandle};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Accept loop handing each device connection to its own session task
pub struct Server {
    listener: TcpListener,
    world: WorldHandle,
    settings: SessionSettings,
    next_session_id: SessionId,
}

impl Server {
    /// Binds the device listener to `addr`
    ///
    /// Every accepted connection becomes a [`ClientSession`] registered with
    /// `world` and configured with `settings`. Session ids start at 1 and
    /// increase with each connection.
    ///
    /// [`ClientSession`]: crate::session::ClientSession
    pub async fn bind(addr: &str, world: WorldHandle, settings: SessionSettings) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            world,
            settings,
            next_session_id: 1,
        })
    }

    /// Address the listener is bound to, useful after binding port 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the world coordinator stops
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => match self.accept_connection(stream, addr) {
                    Ok(()) => {}
                    Err(WorldError::Closed) => {
                        info!("World coordinator stopped, no longer accepting connections");
                        return Ok(());
                    }
                    Err(e) => warn!("Dropping connection from {}: {}", addr, e),
                },
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Registers a new session with the coordinator, then starts its task
    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<(), WorldError> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1);
        info!("Device connected from {} as session {}", addr, id);

        let (handle, mailbox) = session_channel(id, addr);
        self.world.register(handle)?;

        let session = ClientSession::new(id, addr, stream, self.world.clone(), mailbox, self.settings);
        tokio::spawn(session.run());
        Ok(())
    }
}
