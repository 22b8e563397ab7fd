//! The seam between the bridge and a blocking change-capture engine.
//!
//! An engine is driven by [`EngineRunner`] on a dedicated worker thread: it is
//! started once, polled for batches until the runner is asked to stop, told
//! to commit each batch after every record of it has been handed off, and
//! closed exactly once.

pub mod channel;
pub mod replay;
pub mod runner;
pub mod types;

use std::time::Duration;

use crate::Result;

pub use channel::{ChannelEngine, ChannelEngineHandle};
pub use replay::ReplayEngine;
pub use runner::{EngineRunner, RunnerState, StopOutcome};
pub use types::{ChangeRecord, Operation, SourceOffset};

/// Outcome of a single [`ChangeEngine::poll`] call.
#[derive(Debug)]
pub enum PollResult {
    /// A batch of committed mutations, in source commit order.
    Records(Vec<ChangeRecord>),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The source has no more changes; the runner completes the stream.
    Exhausted,
}

/// A blocking, poll-based change-capture connector.
///
/// All methods are called from the same worker thread. Blocking calls should
/// return within roughly `timeout` so the runner can notice a stop request.
pub trait ChangeEngine: Send + 'static {
    /// Connects to the source. An error here is reported as an engine
    /// startup failure.
    fn start(&mut self) -> Result<()>;

    fn poll(&mut self, timeout: Duration) -> Result<PollResult>;

    /// Acknowledges everything up to and including `offset`.
    fn commit(&mut self, offset: &SourceOffset) -> Result<()>;

    /// Releases the engine's resources. Called exactly once per worker.
    fn close(&mut self);
}

/// Per-record callback invoked by the runner on the engine worker.
pub trait RecordHandler: Send + 'static {
    /// Hands one record off. Returning [`crate::Error::ConsumerClosed`] ends
    /// the loop quietly; any other error ends it as a runtime failure.
    fn handle(&mut self, record: ChangeRecord) -> Result<()>;

    /// Receives the terminal outcome of the engine loop, once.
    fn on_terminate(&mut self, outcome: Result<()>);
}
