//! On-disk power-spot collection
//!
//! The spot list is stored as `{"power-spots": [...]}` and rewritten in full
//! after every change. The coordinator never writes the file itself: it sends
//! snapshots to the writer task started by [`SpotStore::spawn_writer`].
//! Await that task after the coordinator stops, otherwise the last snapshot
//! can be lost when the runtime shuts down.

use log::{debug, error, info};
use shared::{PowerSpot, SpotFile};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed power-spot file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Location of the power-spot file
///
/// The store holds only the path. Every [`load`](Self::load) and
/// [`save`](Self::save) goes to disk.
#[derive(Debug, Clone)]
pub struct SpotStore {
    path: PathBuf,
}

impl SpotStore {
    /// Creates a store backed by the file at `path`
    ///
    /// Nothing is read or created until the first load or save. The parent
    /// directory must exist by the time the first snapshot is saved.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored spots; a file that does not exist yet is an empty list
    pub fn load(&self) -> Result<Vec<PowerSpot>, ConfigError> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No power-spot file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: SpotFile = serde_json::from_slice(&contents).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        info!(
            "Loaded {} power spots from {}",
            file.power_spots.len(),
            self.path.display()
        );
        Ok(file.power_spots)
    }

    /// Replaces the file with `spots`, writing through a temp file
    pub async fn save(&self, spots: &[PowerSpot]) -> Result<(), ConfigError> {
        let file = SpotFile {
            power_spots: spots.to_vec(),
        };
        let contents = serde_json::to_vec_pretty(&file).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let temp_path = self.path.with_extension("tmp");
        let io_error = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&temp_path, &contents).await.map_err(io_error)?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(io_error)?;

        debug!("Saved {} power spots to {}", spots.len(), self.path.display());
        Ok(())
    }

    /// Starts the task that persists snapshots sent by the coordinator
    ///
    /// Snapshots that pile up while a write is in progress are skipped in
    /// favour of the newest one. Once every sender is dropped the task writes
    /// whatever is still queued and ends, so awaiting the returned handle
    /// guarantees the last snapshot is on disk.
    pub fn spawn_writer(self) -> (mpsc::UnboundedSender<Vec<PowerSpot>>, JoinHandle<()>) {
        let (sender, mut snapshots) = mpsc::unbounded_channel::<Vec<PowerSpot>>();

        let task = tokio::spawn(async move {
            while let Some(mut latest) = snapshots.recv().await {
                while let Ok(newer) = snapshots.try_recv() {
                    latest = newer;
                }
                if let Err(e) = self.save(&latest).await {
                    error!("Failed to persist power spots: {}", e);
                }
            }
            debug!("Persistence writer for {} stopped", self.path.display());
        });

        (sender, task)
    }
}
