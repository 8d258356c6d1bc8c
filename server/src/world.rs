//! The world coordinator: sole owner of the power spots and session registry
//!
//! Every read or write of shared state is an instruction posted to the
//! coordinator's inbound queue and handled to completion, one at a time, by a
//! single task. Sessions, the admin HTTP layer and the listener only ever hold
//! a [`WorldHandle`]; nothing outside the coordinator sees the live spot list,
//! readers get a copy.

use log::{debug, info, warn};
use shared::{distance, fspl, rssi, Coords, PowerSpot, RfError, RssiReport};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::registry::{SessionHandle, SessionId, SessionRegistry};
use crate::session::SessionInstruction;

/// How long termination waits for each session by default
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by the coordinator and its handle
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorldError {
    #[error("no power spots configured")]
    NoPowerSpots,
    #[error("session has not reported its position")]
    MissingCoordinates,
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),
    #[error("invalid power spot: {0}")]
    InvalidPowerSpot(String),
    #[error(transparent)]
    Rf(#[from] RfError),
    #[error("world coordinator has stopped")]
    Closed,
}

/// Last position and sensitivity a session received from its device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatus {
    pub coords: Option<Coords>,
    /// Meters; infinite until the device reports one
    pub sensitivity_range: f64,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            coords: None,
            sensitivity_range: f64::INFINITY,
        }
    }
}

/// Result of adding a power spot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// A spot with the same name existed and was overwritten in place
    Replaced,
}

/// Instructions consumed by the world coordinator
#[derive(Debug)]
pub enum WorldInstruction {
    Register(SessionHandle),
    Deregister {
        id: SessionId,
    },
    Status {
        session: SessionId,
        status: SessionStatus,
    },
    AddPowerSpot {
        spot: PowerSpot,
        reply: oneshot::Sender<Result<AddOutcome, WorldError>>,
    },
    DeletePowerSpot {
        name: String,
        reply: oneshot::Sender<usize>,
    },
    ListPowerSpots {
        reply: oneshot::Sender<Vec<PowerSpot>>,
    },
    Terminate {
        done: oneshot::Sender<()>,
    },
}

/// Lifecycle of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    Running,
    Terminated,
}

/// Picks the nearest power spot and computes what the device would receive.
///
/// Ties in distance go to the spot listed first.
pub fn resolve_rssi(spots: &[PowerSpot], status: &SessionStatus) -> Result<RssiReport, WorldError> {
    let coords = status.coords.ok_or(WorldError::MissingCoordinates)?;

    let mut nearest: Option<(&PowerSpot, f64)> = None;
    for spot in spots {
        let d = distance(coords, spot.coords());
        match nearest {
            Some((_, best)) if best <= d => {}
            _ => nearest = Some((spot, d)),
        }
    }
    let (spot, d) = nearest.ok_or(WorldError::NoPowerSpots)?;

    Ok(RssiReport {
        dbm: rssi(spot.radiation_strength, d)?,
        dbm_threshold: -fspl(status.sensitivity_range)?,
        distance: d,
        name: spot.name.clone(),
    })
}

fn validate(spot: &PowerSpot) -> Result<(), WorldError> {
    if spot.name.trim().is_empty() {
        return Err(WorldError::InvalidPowerSpot("name is empty".to_string()));
    }
    if !(-90.0..=90.0).contains(&spot.lat) {
        return Err(WorldError::InvalidPowerSpot(format!("latitude {} out of range", spot.lat)));
    }
    if !(-180.0..=180.0).contains(&spot.lon) {
        return Err(WorldError::InvalidPowerSpot(format!("longitude {} out of range", spot.lon)));
    }
    if !spot.radiation_strength.is_finite() {
        return Err(WorldError::InvalidPowerSpot(format!(
            "radiation strength {} is not finite",
            spot.radiation_strength
        )));
    }
    Ok(())
}

/// Authoritative world state plus the queue that feeds it
pub struct World {
    power_spots: Vec<PowerSpot>,
    sessions: SessionRegistry,
    inbox: mpsc::UnboundedReceiver<WorldInstruction>,
    persistence: Option<mpsc::UnboundedSender<Vec<PowerSpot>>>,
    drain_timeout: Duration,
    state: WorldState,
}

impl World {
    /// Creates the coordinator and the handle used to reach it
    ///
    /// Initial spots with duplicate names are collapsed, last one wins.
    pub fn new(power_spots: Vec<PowerSpot>) -> (Self, WorldHandle) {
        let (sender, inbox) = mpsc::unbounded_channel();
        let mut world = Self {
            power_spots: Vec::with_capacity(power_spots.len()),
            sessions: SessionRegistry::new(),
            inbox,
            persistence: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            state: WorldState::Running,
        };
        for spot in power_spots {
            world.insert_or_replace(spot);
        }
        (world, WorldHandle { sender })
    }

    /// Sets how long termination waits for each session to finish
    ///
    /// Sessions still running after the timeout are abandoned with a
    /// warning. Defaults to [`DEFAULT_DRAIN_TIMEOUT`].
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Sends a snapshot of the spot list to `sink` after every change
    pub fn with_persistence(mut self, sink: mpsc::UnboundedSender<Vec<PowerSpot>>) -> Self {
        self.persistence = Some(sink);
        self
    }

    /// Runs the coordinator on its own task
    ///
    /// The task ends after a terminate instruction has drained every
    /// session, or once every [`WorldHandle`] is dropped. The coordinator is
    /// dropped with the task, which closes its persistence sink.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Processes instructions until terminated or until every handle is gone
    pub async fn run(mut self) {
        info!(
            "World coordinator running with {} power spots",
            self.power_spots.len()
        );

        while self.state == WorldState::Running {
            match self.inbox.recv().await {
                Some(instruction) => self.handle_instruction(instruction).await,
                None => {
                    info!("All world handles dropped");
                    break;
                }
            }
        }

        info!("World coordinator terminated");
    }

    async fn handle_instruction(&mut self, instruction: WorldInstruction) {
        debug!("Received instruction: {:?}", instruction);

        match instruction {
            WorldInstruction::Register(handle) => {
                if !self.sessions.register(handle) {
                    warn!("Replaced a stale registration with a reused session id");
                }
                debug!("{} sessions connected", self.sessions.len());
            }
            WorldInstruction::Deregister { id } => {
                if self.sessions.deregister(&id).is_some() {
                    debug!("{} sessions connected", self.sessions.len());
                }
            }
            WorldInstruction::Status { session, status } => {
                if let Err(e) = self.handle_status(session, &status) {
                    warn!("No RSSI report for session {}: {}", session, e);
                }
            }
            WorldInstruction::AddPowerSpot { spot, reply } => {
                let result = self.add_power_spot(spot);
                if let Err(e) = &result {
                    warn!("Rejected power spot: {}", e);
                }
                let _ = reply.send(result);
            }
            WorldInstruction::DeletePowerSpot { name, reply } => {
                let removed = self.delete_power_spot(&name);
                let _ = reply.send(removed);
            }
            WorldInstruction::ListPowerSpots { reply } => {
                let _ = reply.send(self.power_spots.clone());
            }
            WorldInstruction::Terminate { done } => {
                self.terminate().await;
                let _ = done.send(());
            }
        }
    }

    fn handle_status(&self, id: SessionId, status: &SessionStatus) -> Result<(), WorldError> {
        let session = self.sessions.get(&id).ok_or(WorldError::UnknownSession(id))?;
        let report = resolve_rssi(&self.power_spots, status)?;

        debug!(
            "Session {}: nearest spot `{}` at {:.1} m, {:.1} dBm",
            id, report.name, report.distance, report.dbm
        );
        if !session.send(SessionInstruction::PowerSpotRssi(report)) {
            debug!("Session {} went away before its report was delivered", id);
        }
        Ok(())
    }

    fn add_power_spot(&mut self, spot: PowerSpot) -> Result<AddOutcome, WorldError> {
        validate(&spot)?;
        debug!("Adding power spot: {:?}", spot);
        let outcome = self.insert_or_replace(spot);
        self.persist();
        Ok(outcome)
    }

    fn insert_or_replace(&mut self, spot: PowerSpot) -> AddOutcome {
        match self.power_spots.iter_mut().find(|s| s.name == spot.name) {
            Some(existing) => {
                *existing = spot;
                AddOutcome::Replaced
            }
            None => {
                self.power_spots.push(spot);
                AddOutcome::Added
            }
        }
    }

    fn delete_power_spot(&mut self, name: &str) -> usize {
        debug!("Deleting power spot: {}", name);
        let before = self.power_spots.len();
        self.power_spots.retain(|s| s.name != name);
        let removed = before - self.power_spots.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn persist(&mut self) {
        if let Some(sink) = &self.persistence {
            if sink.send(self.power_spots.clone()).is_err() {
                warn!("Persistence writer has stopped, changes are kept in memory only");
                self.persistence = None;
            }
        }
    }

    async fn terminate(&mut self) {
        info!("Terminating...");
        if self.sessions.is_empty() {
            info!("No sessions connected");
        }
        let sessions = self.sessions.drain();

        for session in &sessions {
            debug!(
                "Sending termination instruction to session {} ({})",
                session.id, session.addr
            );
            session.send(SessionInstruction::Terminate);
        }

        info!("Waiting for {} sessions to terminate...", sessions.len());
        for session in sessions {
            let id = session.id;
            if !session.wait_finished(self.drain_timeout).await {
                warn!(
                    "Session {} did not shut down within {:?}",
                    id, self.drain_timeout
                );
            }
        }

        self.state = WorldState::Terminated;
    }
}

/// Cloneable entry point to the world coordinator
///
/// Covers both the device-facing instructions posted by sessions and the
/// administrative commands (add, delete, list, terminate).
#[derive(Debug, Clone)]
pub struct WorldHandle {
    sender: mpsc::UnboundedSender<WorldInstruction>,
}

impl WorldHandle {
    /// Queues an instruction without waiting for it to be handled
    ///
    /// Fails with [`WorldError::Closed`] once the coordinator has stopped.
    pub fn post(&self, instruction: WorldInstruction) -> Result<(), WorldError> {
        self.sender.send(instruction).map_err(|_| WorldError::Closed)
    }

    /// Adds a session to the registry
    ///
    /// Post this before spawning the session so that its first status
    /// report cannot overtake the registration.
    pub fn register(&self, handle: SessionHandle) -> Result<(), WorldError> {
        self.post(WorldInstruction::Register(handle))
    }

    /// Removes a session from the registry
    pub fn deregister(&self, id: SessionId) -> Result<(), WorldError> {
        self.post(WorldInstruction::Deregister { id })
    }

    /// Asks for an RSSI report for `session` at `status`
    ///
    /// The report, if any, arrives later in the session's mailbox.
    pub fn report_status(&self, session: SessionId, status: SessionStatus) -> Result<(), WorldError> {
        self.post(WorldInstruction::Status { session, status })
    }

    /// Adds a power spot, replacing any spot with the same name
    ///
    /// Coordinates outside the valid ranges and blank names are rejected
    /// with [`WorldError::InvalidPowerSpot`].
    pub async fn add_power_spot(
        &self,
        name: impl Into<String>,
        lat: f64,
        lon: f64,
        radiation_strength: f64,
    ) -> Result<AddOutcome, WorldError> {
        let (reply, response) = oneshot::channel();
        self.post(WorldInstruction::AddPowerSpot {
            spot: PowerSpot::new(name, lat, lon, radiation_strength),
            reply,
        })?;
        response.await.map_err(|_| WorldError::Closed)?
    }

    /// Removes every spot called `name`, returning how many were removed
    pub async fn delete_power_spot(&self, name: impl Into<String>) -> Result<usize, WorldError> {
        let (reply, response) = oneshot::channel();
        self.post(WorldInstruction::DeletePowerSpot {
            name: name.into(),
            reply,
        })?;
        response.await.map_err(|_| WorldError::Closed)
    }

    /// Returns a copy of the current spot list
    pub async fn list_power_spots(&self) -> Result<Vec<PowerSpot>, WorldError> {
        let (reply, response) = oneshot::channel();
        self.post(WorldInstruction::ListPowerSpots { reply })?;
        response.await.map_err(|_| WorldError::Closed)
    }

    /// Stops every session and then the coordinator itself
    ///
    /// Resolves once the coordinator has finished draining sessions.
    pub async fn terminate(&self) -> Result<(), WorldError> {
        let (done, finished) = oneshot::channel();
        self.post(WorldInstruction::Terminate { done })?;
        // A dropped `done` also means the coordinator is gone
        let _ = finished.await;
        Ok(())
    }

    /// True once the coordinator has stopped accepting instructions
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
