use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::FusedStream;
use futures::Stream;
use tracing::{debug, info, instrument, warn};

use super::bridge::{bridge, BridgeSender, BridgeStream};
use super::envelope::OutboundEnvelope;
use crate::engine::{ChangeEngine, ChangeRecord, EngineRunner, RecordHandler, StopOutcome};
use crate::transform::Transformer;
use crate::{Config, Result};

/// Runs on the engine worker: transforms each record and hands it to the
/// bridge.
struct BridgeHandler {
    transformer: Transformer,
    sender: BridgeSender,
}

impl RecordHandler for BridgeHandler {
    fn handle(&mut self, record: ChangeRecord) -> Result<()> {
        match self.transformer.transform(record)? {
            Some(envelope) => self.sender.accept(envelope),
            None => Ok(()),
        }
    }

    fn on_terminate(&mut self, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.sender.complete(),
            Err(e) => self.sender.fail(e),
        }
    }
}

/// Entry point: turns a [`ChangeEngine`] into a stream of
/// [`OutboundEnvelope`]s.
///
/// A supplier is consumed by activation, so one engine backs at most one
/// stream.
pub struct StreamSupplier<E: ChangeEngine> {
    engine: E,
    config: Config,
}

impl<E: ChangeEngine> StreamSupplier<E> {
    pub fn new(engine: E, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    /// A lazy stream: the engine starts on the first poll and stops when the
    /// stream ends, fails, or is dropped.
    pub fn get(self) -> ChangeStream {
        let (sender, receiver) = bridge(self.config.backpressure());
        let handler = BridgeHandler {
            transformer: Transformer::from_config(&self.config),
            sender,
        };
        let runner = Arc::new(EngineRunner::new(self.engine, handler, &self.config.engine));

        ChangeStream {
            runner,
            inner: receiver,
            started: false,
            stop_issued: false,
        }
    }

    /// Starts the engine now and waits until it is running, so a startup
    /// failure is returned here instead of on the stream.
    #[instrument(skip(self), fields(engine = %self.config.engine.name))]
    pub async fn activate(self) -> Result<ChangeStream> {
        let mut stream = self.get();
        stream.ensure_started()?;

        if let Err(e) = stream.runner.wait_until_started().await {
            warn!(error = %e, "Engine failed to start");
            stream.close().await;
            return Err(e);
        }

        info!("Change stream activated");
        Ok(stream)
    }
}

/// The consumable change sequence.
///
/// Dropping it cancels the engine; the stop runs off the async executor and
/// releases the worker within the configured grace period.
pub struct ChangeStream {
    runner: Arc<EngineRunner>,
    inner: BridgeStream,
    started: bool,
    stop_issued: bool,
}

impl ChangeStream {
    pub fn runner(&self) -> &Arc<EngineRunner> {
        &self.runner
    }

    /// Envelopes buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.inner.len()
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped()
    }

    /// Cancels the stream and waits for the engine to stop.
    pub async fn close(mut self) -> StopOutcome {
        self.inner.close();
        if self.stop_issued {
            return StopOutcome::AlreadyStopped;
        }
        self.stop_issued = true;

        let runner = Arc::clone(&self.runner);
        tokio::task::spawn_blocking(move || runner.stop())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Stop task failed");
                StopOutcome::Abandoned
            })
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        debug!(engine = %self.runner.name(), "First demand, starting engine");
        self.runner.start()
    }

    fn release(&mut self) {
        if !self.started || self.stop_issued {
            return;
        }
        self.stop_issued = true;

        let runner = Arc::clone(&self.runner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let outcome = runner.stop();
                    debug!(?outcome, "Engine stopped after stream termination");
                });
            }
            Err(_) => {
                let outcome = runner.stop();
                debug!(?outcome, "Engine stopped after stream termination");
            }
        }
    }
}

impl Stream for ChangeStream {
    type Item = Result<OutboundEnvelope>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Err(e) = this.ensure_started() {
            this.inner.close();
            this.release();
            return Poll::Ready(Some(Err(e)));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                this.release();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.release();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

impl FusedStream for ChangeStream {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.inner.close();
        self.release();
    }
}
