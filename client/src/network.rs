use crate::walk::RandomWalk;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use shared::protocol::{self, DeviceMessage, RssiReport, ServerMessage, StatusPayload};
use shared::{Coords, FrameDecoder};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::interval;

/// How the emulated device behaves
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub server: String,
    pub start: Coords,
    /// Meters
    pub sensitivity_range: f64,
    pub interval: Duration,
    /// Meters walked between two status updates
    pub step_m: f64,
    /// Send a ping every this many status updates, never if zero
    pub ping_every: u32,
    pub seed: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", shared::DEFAULT_DEVICE_PORT),
            start: Coords::new(0.0, 0.0),
            sensitivity_range: 1000.0,
            interval: Duration::from_secs(1),
            step_m: 5.0,
            ping_every: 10,
            seed: None,
        }
    }
}

/// Emulated device holding one connection to the server
pub struct Device {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: VecDeque<ServerMessage>,
    walk: RandomWalk<StdRng>,
    config: DeviceConfig,
    ticks: u64,
    last_report: Option<RssiReport>,
    pongs: u64,
}

impl Device {
    pub async fn connect(config: DeviceConfig) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to server at {}...", config.server);
        let stream = TcpStream::connect(&config.server).await?;
        stream.set_nodelay(true)?;
        info!("Connected from {}", stream.local_addr()?);

        let walk = match config.seed {
            Some(seed) => RandomWalk::with_seed(config.start, config.step_m, seed),
            None => RandomWalk::new(config.start, config.step_m),
        };

        Ok(Device {
            stream,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            walk,
            config,
            ticks: 0,
            last_report: None,
            pongs: 0,
        })
    }

    pub fn position(&self) -> Coords {
        self.walk.position()
    }

    pub fn last_report(&self) -> Option<&RssiReport> {
        self.last_report.as_ref()
    }

    pub fn pongs(&self) -> u64 {
        self.pongs
    }

    async fn send(&mut self, message: &DeviceMessage) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = protocol::encode(message)?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Reports the current position, then moves on for the next tick
    pub async fn tick(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let position = self.walk.position();
        let status = DeviceMessage::Status {
            payload: StatusPayload {
                lat: position.lat,
                lon: position.lon,
                sensitivity_range: self.config.sensitivity_range,
            },
        };
        self.send(&status).await?;

        self.ticks += 1;
        if self.config.ping_every > 0 && self.ticks % u64::from(self.config.ping_every) == 0 {
            self.send(&DeviceMessage::Ping).await?;
        }

        self.walk.step();
        Ok(())
    }

    /// Waits for the next message from the server
    ///
    /// Returns `None` once the server has closed the connection.
    pub async fn receive(&mut self) -> Result<Option<ServerMessage>, Box<dyn std::error::Error>> {
        let mut buffer = [0u8; 1024];

        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }

            let len = self.stream.read(&mut buffer).await?;
            if len == 0 {
                return Ok(None);
            }

            for frame in self.decoder.feed(&buffer[..len]) {
                match serde_json::from_value::<ServerMessage>(frame?) {
                    Ok(message) => self.pending.push_back(message),
                    Err(e) => warn!("Ignoring unexpected message: {}", e),
                }
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Pong => {
                self.pongs += 1;
                debug!("Pong received");
            }
            ServerMessage::PowerSpotRssi(report) => {
                if report.is_receivable() {
                    info!(
                        "In range of `{}`: {:.1} dBm at {:.1} m (threshold {:.1} dBm)",
                        report.name, report.dbm, report.distance, report.dbm_threshold
                    );
                } else {
                    info!(
                        "Nearest spot `{}` too weak: {:.1} dBm at {:.1} m (threshold {:.1} dBm)",
                        report.name, report.dbm, report.distance, report.dbm_threshold
                    );
                }
                self.last_report = Some(report);
            }
        }
    }

    /// Runs until the server disconnects or `max_ticks` status updates were sent
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
        let mut status_interval = interval(self.config.interval);

        loop {
            if max_ticks.is_some_and(|max| self.ticks >= max) {
                return Ok(());
            }

            tokio::select! {
                received = self.receive() => match received {
                    Ok(Some(message)) => self.handle_message(message),
                    Ok(None) => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                    Err(e) => {
                        error!("Error receiving message: {}", e);
                        return Err(e);
                    }
                },

                _ = status_interval.tick() => {
                    self.tick().await?;
                }
            }
        }
    }
}
