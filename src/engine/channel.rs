use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{ChangeEngine, ChangeRecord, PollResult, SourceOffset};
use crate::{Error, Result};

enum Command {
    Batch(Vec<ChangeRecord>),
    Fail(String),
    Finish,
}

#[derive(Default)]
struct Progress {
    committed: Mutex<Vec<SourceOffset>>,
    closes: AtomicUsize,
    started: AtomicBool,
}

/// An in-process engine fed through a [`ChannelEngineHandle`].
///
/// Each `send`/`send_batch` call becomes one committed batch. Dropping every
/// handle ends the source.
pub struct ChannelEngine {
    commands: Receiver<Command>,
    progress: Arc<Progress>,
    start_failure: Option<String>,
}

#[derive(Clone)]
pub struct ChannelEngineHandle {
    commands: Sender<Command>,
    progress: Arc<Progress>,
}

impl ChannelEngine {
    pub fn new() -> (Self, ChannelEngineHandle) {
        let (tx, rx) = unbounded();
        let progress = Arc::new(Progress::default());

        let engine = Self {
            commands: rx,
            progress: Arc::clone(&progress),
            start_failure: None,
        };
        let handle = ChannelEngineHandle {
            commands: tx,
            progress,
        };
        (engine, handle)
    }

    /// An engine whose `start` fails with `message`.
    pub fn failing_on_start(message: impl Into<String>) -> (Self, ChannelEngineHandle) {
        let (mut engine, handle) = Self::new();
        engine.start_failure = Some(message.into());
        (engine, handle)
    }
}

impl ChangeEngine for ChannelEngine {
    fn start(&mut self) -> Result<()> {
        if let Some(message) = &self.start_failure {
            return Err(Error::EngineStartup(message.clone()));
        }
        self.progress.started.store(true, Ordering::Release);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollResult> {
        match self.commands.recv_timeout(timeout) {
            Ok(Command::Batch(records)) => Ok(PollResult::Records(records)),
            Ok(Command::Fail(message)) => Err(Error::EngineRuntime(message)),
            Ok(Command::Finish) => Ok(PollResult::Exhausted),
            Err(RecvTimeoutError::Timeout) => Ok(PollResult::Idle),
            Err(RecvTimeoutError::Disconnected) => {
                debug!("All channel engine handles dropped");
                Ok(PollResult::Exhausted)
            }
        }
    }

    fn commit(&mut self, offset: &SourceOffset) -> Result<()> {
        self.progress.committed.lock().push(offset.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.progress.closes.fetch_add(1, Ordering::AcqRel);
    }
}

impl ChannelEngineHandle {
    pub fn send(&self, record: ChangeRecord) -> Result<()> {
        self.send_batch(vec![record])
    }

    pub fn send_batch(&self, records: Vec<ChangeRecord>) -> Result<()> {
        self.commands
            .send(Command::Batch(records))
            .map_err(|_| Error::Shutdown)
    }

    /// Makes the engine's next poll fail with a runtime error.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.commands.send(Command::Fail(message.into()));
    }

    /// Ends the source after everything already sent.
    pub fn finish(&self) {
        let _ = self.commands.send(Command::Finish);
    }

    pub fn committed(&self) -> Vec<SourceOffset> {
        self.progress.committed.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.progress.closes.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.progress.started.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Operation;

    #[test]
    fn test_poll_follows_command_order() {
        let (mut engine, handle) = ChannelEngine::new();
        engine.start().unwrap();

        handle
            .send(ChangeRecord::new("t", Operation::Create))
            .unwrap();
        handle.fail("boom");
        handle.finish();

        let timeout = Duration::from_millis(10);
        assert!(matches!(engine.poll(timeout), Ok(PollResult::Records(r)) if r.len() == 1));
        assert!(matches!(engine.poll(timeout), Err(Error::EngineRuntime(m)) if m == "boom"));
        assert!(matches!(engine.poll(timeout), Ok(PollResult::Exhausted)));
        assert!(matches!(engine.poll(timeout), Ok(PollResult::Idle)));
    }

    #[test]
    fn test_dropped_handles_exhaust_the_source() {
        let (mut engine, handle) = ChannelEngine::new();
        drop(handle);

        assert!(matches!(
            engine.poll(Duration::from_millis(10)),
            Ok(PollResult::Exhausted)
        ));
    }

    #[test]
    fn test_start_failure() {
        let (mut engine, handle) = ChannelEngine::failing_on_start("bad credentials");

        assert!(matches!(engine.start(), Err(Error::EngineStartup(_))));
        assert!(!handle.is_started());
    }
}
