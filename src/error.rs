//! Error types and result handling for cdc-bridge.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use cdc_bridge::{Error, Result};
//!
//! fn open_engine() -> Result<()> {
//!     // Simulating a connector that rejects its configuration
//!     Err(Error::EngineStartup("unknown connector class".to_string()))
//! }
//!
//! match open_engine() {
//!     Ok(()) => println!("Engine started"),
//!     Err(Error::EngineStartup(msg)) => eprintln!("Startup failed: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for cdc-bridge operations.
///
/// Engine failures carry their message as a `String` so the same failure can
/// be reported on the change stream and to an `activate()` caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// Configuration loaded but holds inconsistent values.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization error when encoding keys, values or offsets.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from checkpoint or change-log files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine worker failed to initialize the engine.
    #[error("Engine startup failed: {0}")]
    EngineStartup(String),

    /// The engine loop failed while running.
    #[error("Engine runtime failure: {0}")]
    EngineRuntime(String),

    /// A bounded buffer stayed full past the configured block timeout.
    #[error("Buffer overflow: {message}")]
    BufferOverflow {
        /// Description of the overflow
        message: String,
    },

    /// The consumer side of the stream went away.
    #[error("Consumer closed")]
    ConsumerClosed,

    /// Graceful shutdown was requested.
    ///
    /// Used by engines to leave a blocking call early once the runner
    /// has been asked to stop.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Whether this error ends the stream as a terminal failure, as opposed
    /// to a cooperative shutdown signal.
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(self, Error::ConsumerClosed | Error::Shutdown)
    }
}

/// A convenient Result type alias for cdc-bridge operations.
///
/// This is equivalent to `std::result::Result<T, cdc_bridge::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
