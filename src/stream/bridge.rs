//! Bounded or unbounded FIFO hand-off between the engine worker and the
//! async consumer.
//!
//! The producer side ([`BridgeSender`]) is called synchronously on the engine
//! thread and only ever holds a short lock; the consumer side
//! ([`BridgeStream`]) is a [`Stream`] that parks its waker when the queue is
//! empty. A terminal error is delivered after every buffered envelope.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::stream::FusedStream;
use futures::task::AtomicWaker;
use futures::Stream;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::envelope::OutboundEnvelope;
use crate::{Error, Result};

/// What the producer does when the consumer falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Never blocks, never loses data; memory grows with the backlog.
    Unbounded,
    /// Blocks the producer while `capacity` envelopes are buffered, failing
    /// with [`Error::BufferOverflow`] after `timeout`.
    Block { capacity: usize, timeout: Duration },
    /// Evicts the oldest buffered envelope to make room.
    DropOldest { capacity: usize },
}

enum Terminal {
    Completed,
    Failed(Error),
}

struct Queue {
    items: VecDeque<OutboundEnvelope>,
    terminal: Option<Terminal>,
    consumer_closed: bool,
    dropped: u64,
}

struct Shared {
    policy: BackpressurePolicy,
    queue: Mutex<Queue>,
    not_full: Condvar,
    waker: AtomicWaker,
}

/// Creates a connected producer/consumer pair.
pub fn bridge(policy: BackpressurePolicy) -> (BridgeSender, BridgeStream) {
    let shared = Arc::new(Shared {
        policy,
        queue: Mutex::new(Queue {
            items: VecDeque::new(),
            terminal: None,
            consumer_closed: false,
            dropped: 0,
        }),
        not_full: Condvar::new(),
        waker: AtomicWaker::new(),
    });

    (
        BridgeSender {
            shared: Arc::clone(&shared),
        },
        BridgeStream {
            shared,
            finished: false,
        },
    )
}

pub struct BridgeSender {
    shared: Arc<Shared>,
}

impl BridgeSender {
    /// Enqueues one envelope in call order.
    ///
    /// Fails with [`Error::ConsumerClosed`] once the consumer is gone, and
    /// with [`Error::BufferOverflow`] when a blocking buffer stays full past
    /// its timeout.
    pub fn accept(&self, envelope: OutboundEnvelope) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.consumer_closed {
            return Err(Error::ConsumerClosed);
        }
        if queue.terminal.is_some() {
            return Err(Error::Shutdown);
        }

        match self.shared.policy {
            BackpressurePolicy::Unbounded => {}
            BackpressurePolicy::DropOldest { capacity } => {
                while queue.items.len() >= capacity {
                    queue.items.pop_front();
                    queue.dropped += 1;
                    trace!(dropped = queue.dropped, "Evicted oldest buffered envelope");
                }
            }
            BackpressurePolicy::Block { capacity, timeout } => {
                let deadline = Instant::now() + timeout;
                while queue.items.len() >= capacity && !queue.consumer_closed {
                    if self
                        .shared
                        .not_full
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                        && queue.items.len() >= capacity
                    {
                        warn!(capacity, timeout_ms = timeout.as_millis() as u64, "Bridge buffer stayed full");
                        return Err(Error::BufferOverflow {
                            message: format!(
                                "{} envelopes buffered for longer than {:?}",
                                capacity, timeout
                            ),
                        });
                    }
                }
                if queue.consumer_closed {
                    return Err(Error::ConsumerClosed);
                }
            }
        }

        queue.items.push_back(envelope);
        drop(queue);
        self.shared.waker.wake();
        Ok(())
    }

    /// Ends the stream after the buffered envelopes.
    pub fn complete(&self) {
        self.terminate(Terminal::Completed);
    }

    /// Ends the stream with `error` after the buffered envelopes.
    pub fn fail(&self, error: Error) {
        self.terminate(Terminal::Failed(error));
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Envelopes evicted by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    fn terminate(&self, terminal: Terminal) {
        let mut queue = self.shared.queue.lock();
        if queue.terminal.is_some() {
            return;
        }
        if let Terminal::Failed(e) = &terminal {
            debug!(error = %e, buffered = queue.items.len(), "Bridge terminating with failure");
        }
        queue.terminal = Some(terminal);
        drop(queue);
        self.shared.waker.wake();
    }
}

impl Drop for BridgeSender {
    fn drop(&mut self) {
        self.complete();
    }
}

/// The consumer half. Yields envelopes in `accept()` order, then either ends
/// or yields one terminal error and ends.
pub struct BridgeStream {
    shared: Arc<Shared>,
    finished: bool,
}

impl BridgeStream {
    pub fn len(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    /// Detaches the consumer: buffered envelopes are discarded and the
    /// producer's next `accept()` fails with [`Error::ConsumerClosed`].
    pub fn close(&mut self) {
        let mut queue = self.shared.queue.lock();
        if !queue.consumer_closed {
            queue.consumer_closed = true;
            let discarded = queue.items.len();
            queue.items.clear();
            debug!(discarded, "Bridge consumer closed");
        }
        drop(queue);
        self.finished = true;
        self.shared.not_full.notify_all();
    }
}

impl Stream for BridgeStream {
    type Item = Result<OutboundEnvelope>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        // Register before looking so a concurrent accept() cannot be missed.
        this.shared.waker.register(cx.waker());

        let mut queue = this.shared.queue.lock();
        if let Some(envelope) = queue.items.pop_front() {
            drop(queue);
            this.shared.not_full.notify_one();
            return Poll::Ready(Some(Ok(envelope)));
        }

        match queue.terminal.take() {
            Some(Terminal::Failed(error)) => {
                queue.terminal = Some(Terminal::Completed);
                this.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Some(Terminal::Completed) => {
                queue.terminal = Some(Terminal::Completed);
                this.finished = true;
                Poll::Ready(None)
            }
            None => Poll::Pending,
        }
    }
}

impl FusedStream for BridgeStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl Drop for BridgeStream {
    fn drop(&mut self) {
        self.close();
    }
}
