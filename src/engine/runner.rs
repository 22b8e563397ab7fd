//! Lifecycle owner for a blocking [`ChangeEngine`].
//!
//! The runner moves through `Idle -> Starting -> Running -> Stopping ->
//! Stopped`. It is single-use: once stopped it cannot be started again.
//! All transitions happen under one lock, so a `stop()` can never interleave
//! with the middle of a `start()`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{ChangeEngine, PollResult, RecordHandler};
use crate::config::EngineConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker exited within the grace period.
    Stopped,
    /// The worker outlived the grace period and was detached.
    Abandoned,
    /// Another caller already tore the runner down, or is doing so now.
    AlreadyStopped,
}

#[derive(Debug, Clone)]
enum Failure {
    Startup(String),
    Runtime(String),
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

struct Inner {
    state: RunnerState,
    pending: Option<(Box<dyn ChangeEngine>, Box<dyn RecordHandler>)>,
    worker: Option<Worker>,
    failure: Option<Failure>,
}

struct Shared {
    name: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<RunnerState>,
    teardowns: AtomicUsize,
}

impl Shared {
    fn transition(&self, inner: &mut Inner, to: RunnerState) {
        let from = inner.state;
        inner.state = to;
        self.state_tx.send_replace(to);
        info!(engine = %self.name, ?from, ?to, "Engine runner state changed");
    }

    fn mark_running(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunnerState::Starting {
            self.transition(&mut inner, RunnerState::Running);
        }
    }

    fn mark_exited(&self, failure: Option<Failure>) {
        let mut inner = self.inner.lock();
        if failure.is_some() {
            inner.failure = failure;
        }
        // A worker leaving on its own (error, exhausted source, consumer
        // gone) finishes the lifecycle; a pending stop() finishes it otherwise.
        if matches!(inner.state, RunnerState::Starting | RunnerState::Running) {
            self.teardowns.fetch_add(1, Ordering::AcqRel);
            self.transition(&mut inner, RunnerState::Stopped);
        }
    }
}

/// Runs a [`ChangeEngine`] on one dedicated thread and feeds every record to
/// a [`RecordHandler`].
pub struct EngineRunner {
    shared: Arc<Shared>,
    stop_requested: Arc<AtomicBool>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl EngineRunner {
    pub fn new<E, H>(engine: E, handler: H, config: &EngineConfig) -> Self
    where
        E: ChangeEngine,
        H: RecordHandler,
    {
        let (state_tx, _) = watch::channel(RunnerState::Idle);

        Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                inner: Mutex::new(Inner {
                    state: RunnerState::Idle,
                    pending: Some((Box::new(engine), Box::new(handler))),
                    worker: None,
                    failure: None,
                }),
                state_tx,
                teardowns: AtomicUsize::new(0),
            }),
            stop_requested: Arc::new(AtomicBool::new(false)),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            grace_period: Duration::from_millis(config.stop_grace_period_ms),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> RunnerState {
        self.shared.inner.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.shared.state_tx.subscribe()
    }

    pub fn state_changes(&self) -> WatchStream<RunnerState> {
        WatchStream::new(self.subscribe())
    }

    /// Number of teardown sequences performed, whether by `stop()` or by the
    /// worker ending on its own; never exceeds one.
    pub fn teardown_count(&self) -> usize {
        self.shared.teardowns.load(Ordering::Acquire)
    }

    /// Spawns the engine worker. A no-op while starting or running.
    #[instrument(skip(self), fields(engine = %self.shared.name))]
    pub fn start(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            RunnerState::Starting | RunnerState::Running => return Ok(()),
            RunnerState::Stopping | RunnerState::Stopped => {
                return Err(Error::EngineStartup(
                    "engine runner is single-use and has already been stopped".to_string(),
                ));
            }
            RunnerState::Idle => {}
        }

        let Some((engine, handler)) = inner.pending.take() else {
            return Err(Error::EngineStartup(
                "engine runner has no engine to start".to_string(),
            ));
        };

        self.shared.transition(&mut inner, RunnerState::Starting);

        let (done_tx, done_rx) = bounded(1);
        let worker = WorkerLoop {
            shared: Arc::clone(&self.shared),
            stop_requested: Arc::clone(&self.stop_requested),
            poll_interval: self.poll_interval,
        };

        let spawned = thread::Builder::new()
            .name(format!("cdc-engine-{}", self.shared.name))
            .spawn(move || worker.run(engine, handler, done_tx));

        match spawned {
            Ok(handle) => {
                inner.worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                Ok(())
            }
            Err(e) => {
                let message = format!("failed to spawn engine worker: {}", e);
                error!(engine = %self.shared.name, "{}", message);
                inner.failure = Some(Failure::Startup(message.clone()));
                self.shared.transition(&mut inner, RunnerState::Stopped);
                Err(Error::EngineStartup(message))
            }
        }
    }

    /// Stops the engine and waits up to the grace period for the worker to
    /// exit. Idempotent and callable from any thread; only the first caller
    /// performs the teardown.
    #[instrument(skip(self), fields(engine = %self.shared.name))]
    pub fn stop(&self) -> StopOutcome {
        let (worker, pending) = {
            let mut inner = self.shared.inner.lock();
            let state = inner.state;
            match state {
                RunnerState::Idle => {
                    let pending = inner.pending.take();
                    self.shared.transition(&mut inner, RunnerState::Stopped);
                    (None, pending)
                }
                RunnerState::Starting | RunnerState::Running => {
                    self.shared.transition(&mut inner, RunnerState::Stopping);
                    (inner.worker.take(), None)
                }
                RunnerState::Stopping => return StopOutcome::AlreadyStopped,
                RunnerState::Stopped => {
                    // The worker finished on its own; reap it.
                    let worker = inner.worker.take();
                    drop(inner);
                    if let Some(worker) = worker {
                        if worker.handle.join().is_err() {
                            warn!("Engine worker panicked while exiting");
                        }
                    }
                    return StopOutcome::AlreadyStopped;
                }
            }
        };

        self.stop_requested.store(true, Ordering::Release);
        self.shared.teardowns.fetch_add(1, Ordering::AcqRel);

        if let Some((engine, mut handler)) = pending {
            debug!("Stopping a runner that never started");
            handler.on_terminate(Ok(()));
            drop(engine);
            return StopOutcome::Stopped;
        }

        let outcome = match worker {
            Some(worker) => match worker.done.recv_timeout(self.grace_period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!("Engine worker panicked while exiting");
                    }
                    StopOutcome::Stopped
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        grace_period_ms = self.grace_period.as_millis() as u64,
                        "Engine worker did not exit within the grace period, abandoning it"
                    );
                    drop(worker.handle);
                    StopOutcome::Abandoned
                }
            },
            None => StopOutcome::Stopped,
        };

        let mut inner = self.shared.inner.lock();
        self.shared.transition(&mut inner, RunnerState::Stopped);
        outcome
    }

    /// Waits until the engine has either come up or failed to.
    ///
    /// Returns the startup error if the engine could not be initialized.
    /// Runtime failures after a successful start are not reported here.
    pub async fn wait_until_started(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let state = *rx
            .wait_for(|s| !matches!(s, RunnerState::Idle | RunnerState::Starting))
            .await
            .map_err(|_| Error::Shutdown)?;

        if state == RunnerState::Running {
            return Ok(());
        }

        match self.shared.inner.lock().failure.clone() {
            Some(Failure::Startup(message)) => Err(Error::EngineStartup(message)),
            _ => Ok(()),
        }
    }

    pub async fn wait_for_state(&self, target: RunnerState) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|s| *s == target).await;
    }

    /// The message of the failure that ended the worker, if any.
    pub fn failure(&self) -> Option<String> {
        self.shared
            .inner
            .lock()
            .failure
            .as_ref()
            .map(|failure| match failure {
                Failure::Startup(message) | Failure::Runtime(message) => message.clone(),
            })
    }
}

impl Drop for EngineRunner {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}

struct WorkerLoop {
    shared: Arc<Shared>,
    stop_requested: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl WorkerLoop {
    fn run(
        self,
        mut engine: Box<dyn ChangeEngine>,
        mut handler: Box<dyn RecordHandler>,
        done: Sender<()>,
    ) {
        debug!(engine = %self.shared.name, "Engine worker started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drive(engine.as_mut(), handler.as_mut())
        }))
        .unwrap_or_else(|payload| {
            Err(Error::EngineRuntime(format!(
                "engine panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        if panic::catch_unwind(AssertUnwindSafe(|| engine.close())).is_err() {
            warn!(engine = %self.shared.name, "Engine panicked while closing");
        }

        let (outcome, failure) = match outcome {
            Ok(()) => (Ok(()), None),
            Err(e) if !e.is_terminal_failure() => {
                debug!(engine = %self.shared.name, reason = %e, "Engine loop ended cooperatively");
                (Ok(()), None)
            }
            Err(e) => {
                error!(engine = %self.shared.name, error = %e, "Engine loop failed");
                let failure = match &e {
                    Error::EngineStartup(message) => Failure::Startup(message.clone()),
                    other => Failure::Runtime(other.to_string()),
                };
                (Err(e), Some(failure))
            }
        };

        handler.on_terminate(outcome);
        let _ = done.send(());
        self.shared.mark_exited(failure);
        debug!(engine = %self.shared.name, "Engine worker exited");
    }

    fn drive(&self, engine: &mut dyn ChangeEngine, handler: &mut dyn RecordHandler) -> Result<()> {
        if self.stop_requested.load(Ordering::Acquire) {
            debug!("Stop requested before the engine started");
            return Ok(());
        }

        engine.start().map_err(startup_failure)?;
        self.shared.mark_running();
        info!(engine = %self.shared.name, "Engine running");

        let mut batches: u64 = 0;
        while !self.stop_requested.load(Ordering::Acquire) {
            let batch = match engine.poll(self.poll_interval).map_err(runtime_failure)? {
                PollResult::Records(batch) if !batch.is_empty() => batch,
                PollResult::Records(_) | PollResult::Idle => continue,
                PollResult::Exhausted => {
                    info!(engine = %self.shared.name, batches, "Engine source exhausted");
                    break;
                }
            };

            let count = batch.len();
            let last_offset = batch.last().map(|record| record.offset.clone());

            for record in batch {
                trace!(topic = %record.topic, op = record.op.code(), "Handing off record");
                handler.handle(record)?;
            }

            // Only acknowledge once the whole batch is in the bridge.
            if let Some(offset) = last_offset {
                engine.commit(&offset).map_err(runtime_failure)?;
            }

            batches += 1;
            debug!(engine = %self.shared.name, records = count, batches, "Batch committed");
        }

        Ok(())
    }
}

fn startup_failure(err: Error) -> Error {
    match err {
        Error::EngineStartup(_) | Error::Shutdown => err,
        other => Error::EngineStartup(other.to_string()),
    }
}

fn runtime_failure(err: Error) -> Error {
    match err {
        Error::EngineRuntime(_) | Error::Shutdown | Error::ConsumerClosed => err,
        other => Error::EngineRuntime(other.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
