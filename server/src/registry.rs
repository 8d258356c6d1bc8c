//! Session bookkeeping for the world coordinator
//!
//! The coordinator never touches a session's state directly. What it keeps
//! per connected device is a [`SessionHandle`]: the sending half of the
//! session's instruction queue plus a completion signal that resolves once
//! the session task has shut down. The session itself owns the matching
//! [`SessionMailbox`].

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::session::SessionInstruction;

/// Connection identity assigned by the listener
pub type SessionId = u32;

/// Coordinator-side view of one session
#[derive(Debug)]
pub struct SessionHandle {
    /// Unique session identifier
    pub id: SessionId,
    /// Peer address of the device
    pub addr: SocketAddr,
    instructions: mpsc::UnboundedSender<SessionInstruction>,
    finished: oneshot::Receiver<()>,
}

/// Session-side ends of the channels paired with a [`SessionHandle`]
///
/// Dropping the mailbox is what tells the coordinator the session is gone.
#[derive(Debug)]
pub struct SessionMailbox {
    pub instructions: mpsc::UnboundedReceiver<SessionInstruction>,
    _finished: oneshot::Sender<()>,
}

/// Creates the linked handle/mailbox pair for a new session
pub fn session_channel(id: SessionId, addr: SocketAddr) -> (SessionHandle, SessionMailbox) {
    let (instructions_tx, instructions_rx) = mpsc::unbounded_channel();
    let (finished_tx, finished_rx) = oneshot::channel();

    let handle = SessionHandle {
        id,
        addr,
        instructions: instructions_tx,
        finished: finished_rx,
    };
    let mailbox = SessionMailbox {
        instructions: instructions_rx,
        _finished: finished_tx,
    };
    (handle, mailbox)
}

impl SessionHandle {
    /// Queues an instruction for the session
    ///
    /// Returns false if the session has already gone away.
    pub fn send(&self, instruction: SessionInstruction) -> bool {
        self.instructions.send(instruction).is_ok()
    }

    /// Waits until the session task has finished, at most `timeout`
    ///
    /// Returns true if the session finished in time.
    pub async fn wait_finished(self, timeout: Duration) -> bool {
        // Either a value or a dropped sender means the session is done
        tokio::time::timeout(timeout, self.finished).await.is_ok()
    }
}

/// Registry of live sessions, owned by the world coordinator
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, replacing any stale entry with the same id
    ///
    /// Returns false if an entry was replaced.
    pub fn register(&mut self, handle: SessionHandle) -> bool {
        info!("Session {} registered from {}", handle.id, handle.addr);
        self.sessions.insert(handle.id, handle).is_none()
    }

    /// Removes a session, returning its handle if it was registered
    pub fn deregister(&mut self, id: &SessionId) -> Option<SessionHandle> {
        let handle = self.sessions.remove(id);
        if let Some(handle) = &handle {
            info!("Session {} from {} deregistered", handle.id, handle.addr);
        }
        handle
    }

    /// Looks up a registered session
    pub fn get(&self, id: &SessionId) -> Option<&SessionHandle> {
        self.sessions.get(id)
    }

    /// Takes every handle out of the registry
    pub fn drain(&mut self) -> Vec<SessionHandle> {
        self.sessions.drain().map(|(_, handle)| handle).collect()
    }

    /// Returns the number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
