//! Offset checkpoint persistence for resumable engines.
//!
//! A checkpoint records the last [`SourceOffset`] an engine committed, that
//! is, the last position whose whole batch made it into the bridge. Engines
//! that restart from a checkpoint may replay records delivered after it, so
//! delivery across restarts is at-least-once.
//!
//! # Example
//!
//! ```rust,no_run
//! use cdc_bridge::checkpoint::{Checkpoint, CheckpointManager};
//! use cdc_bridge::engine::SourceOffset;
//!
//! fn main() -> cdc_bridge::Result<()> {
//!     let manager = CheckpointManager::new("offsets.json");
//!
//!     if let Some(checkpoint) = manager.load()? {
//!         println!("Resuming from {:?}", checkpoint.offset);
//!     }
//!
//!     let checkpoint = Checkpoint::new(SourceOffset::new().with("line", 42), 42);
//!     manager.save(&checkpoint)?;
//!     Ok(())
//! }
//! ```

use crate::engine::SourceOffset;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// The last committed position of an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The last committed source offset
    pub offset: SourceOffset,
    /// The timestamp when this checkpoint was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Number of records committed since startup
    pub record_count: u64,
}

impl Checkpoint {
    /// Creates a new checkpoint with the current timestamp.
    ///
    /// ```rust
    /// use cdc_bridge::checkpoint::Checkpoint;
    /// use cdc_bridge::engine::SourceOffset;
    ///
    /// let checkpoint = Checkpoint::new(SourceOffset::new().with("lsn", 7), 100);
    /// assert_eq!(checkpoint.record_count, 100);
    /// ```
    pub fn new(offset: SourceOffset, record_count: u64) -> Self {
        Self {
            offset,
            timestamp: chrono::Utc::now(),
            record_count,
        }
    }
}

/// Manages checkpoint persistence to disk.
///
/// Writes are atomic: the checkpoint file is never observed half-written,
/// even if the process crashes mid-save. All operations are blocking and
/// meant to be called from the engine worker.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: checkpoint_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Loads checkpoint from disk if it exists.
    ///
    /// Returns `None` if the checkpoint file doesn't exist, which typically
    /// means this is the first run or the checkpoint was deleted.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read or does not hold a
    /// valid checkpoint.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.file_path.exists() {
            debug!("No checkpoint file found at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).map_err(|e| {
            error!("Failed to read checkpoint file: {}", e);
            Error::Io(e)
        })?;

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => {
                info!(
                    offset = ?checkpoint.offset,
                    timestamp = %checkpoint.timestamp,
                    "Loaded checkpoint"
                );
                Ok(Some(checkpoint))
            }
            Err(e) => {
                error!("Failed to parse checkpoint file: {}", e);
                Err(Error::Serialization(e))
            }
        }
    }

    /// Saves checkpoint to disk atomically.
    ///
    /// 1. Write to a temporary file next to the target
    /// 2. Sync the file so the data is on disk
    /// 3. Rename the temporary file over the target
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        debug!(offset = ?checkpoint.offset, "Saving checkpoint");

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(checkpoint)?;
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.file_path)?;

        debug!("Checkpoint saved successfully");
        Ok(())
    }

    /// Deletes the checkpoint file if it exists, so the next run starts from
    /// the beginning of the source.
    pub fn delete(&self) -> Result<()> {
        if self.file_path.exists() {
            fs::remove_file(&self.file_path)?;
            info!("Deleted checkpoint file");
        }
        Ok(())
    }
}
