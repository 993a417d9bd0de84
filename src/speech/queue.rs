//! Bounded FIFO of sentences awaiting synthesis
//!
//! The queue is shared between the orchestrator (producer) and the
//! synthesis/playback worker (consumer). At most one sentence is leased for
//! playback at a time; the lease is released when dropped. State lives in a
//! `watch` channel so every waiter observes each transition.
//!
//! A playback fault recorded by the worker is handed to the producer exactly
//! once: either the next `enqueue` or `wait_idle` returns it.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

use crate::reply::Sentence;
use crate::{Error, Result};

#[derive(Debug)]
struct Queued {
    sentence: Sentence,
    epoch: u64,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<Queued>,
    capacity: usize,
    in_flight: bool,
    epoch: u64,
    closed: bool,
    fault: Option<Error>,
}

impl QueueState {
    fn has_room(&self) -> bool {
        self.items.len() < self.capacity
    }

    fn is_idle(&self) -> bool {
        self.items.is_empty() && !self.in_flight
    }
}

/// Handle to the shared speech queue
#[derive(Debug, Clone)]
pub struct SpeechQueue {
    state: Arc<watch::Sender<QueueState>>,
}

/// A sentence checked out for synthesis and playback
///
/// Dropping the lease lets the worker take the next sentence.
#[derive(Debug)]
pub struct Lease {
    sentence: Sentence,
    epoch: u64,
    queue: SpeechQueue,
}

impl Lease {
    #[must_use]
    pub const fn sentence(&self) -> &Sentence {
        &self.sentence
    }

    /// Turn generation the sentence was queued in
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the turn this sentence belongs to is still live
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.queue.is_current(self.epoch)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.queue.state.send_modify(|s| s.in_flight = false);
    }
}

impl SpeechQueue {
    /// Create a queue holding at most `capacity` pending sentences
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(QueueState {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            in_flight: false,
            epoch: 0,
            closed: false,
            fault: None,
        });
        Self {
            state: Arc::new(tx),
        }
    }

    /// Append a sentence, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` if the queue was closed, or the worker's fault
    /// if playback failed since the last `clear()`
    pub async fn enqueue(&self, sentence: Sentence) -> Result<()> {
        let mut rx = self.state.subscribe();
        let mut pending = Some(sentence);

        loop {
            let closed = rx
                .wait_for(|s| s.closed || s.fault.is_some() || s.has_room())
                .await
                .map_err(|_| Error::QueueClosed)?
                .closed;
            if closed {
                return Err(Error::QueueClosed);
            }
            if let Some(fault) = self.take_fault() {
                return Err(fault);
            }

            self.state.send_if_modified(|s| {
                if s.closed || s.fault.is_some() || !s.has_room() {
                    return false;
                }
                match pending.take() {
                    Some(sentence) => {
                        s.items.push_back(Queued {
                            sentence,
                            epoch: s.epoch,
                        });
                        true
                    }
                    None => false,
                }
            });

            if pending.is_none() {
                return Ok(());
            }
        }
    }

    /// Take the oldest sentence once nothing else is playing
    ///
    /// Returns `None` when the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Lease> {
        let mut rx = self.state.subscribe();

        loop {
            let finished = rx
                .wait_for(|s| (!s.in_flight && !s.items.is_empty()) || (s.closed && s.items.is_empty()))
                .await
                .map(|s| s.closed && s.items.is_empty())
                .unwrap_or(true);
            if finished {
                return None;
            }

            let mut taken = None;
            self.state.send_if_modified(|s| {
                if s.in_flight {
                    return false;
                }
                match s.items.pop_front() {
                    Some(queued) => {
                        s.in_flight = true;
                        taken = Some(queued);
                        true
                    }
                    None => false,
                }
            });

            if let Some(Queued { sentence, epoch }) = taken {
                return Some(Lease {
                    sentence,
                    epoch,
                    queue: self.clone(),
                });
            }
        }
    }

    /// Release a lease once its sentence has been played or skipped
    pub fn complete(&self, lease: Lease) {
        drop(lease);
    }

    /// Drop every pending sentence and start a new turn generation
    ///
    /// A sentence already leased keeps playing, but leases from older
    /// generations report `is_current() == false`. An unreported fault
    /// belongs to the discarded generation and is dropped too. Returns the
    /// number of sentences discarded.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        self.state.send_modify(|s| {
            dropped = s.items.len();
            s.items.clear();
            s.epoch += 1;
            s.fault = None;
        });
        if dropped > 0 {
            tracing::debug!(dropped, "speech queue cleared");
        }
        dropped
    }

    /// Record a playback failure and abandon the pending sentences
    ///
    /// Until the fault is reported or the queue is cleared, `enqueue`
    /// refuses new sentences.
    pub fn fail(&self, error: Error) {
        self.state.send_modify(|s| {
            s.items.clear();
            s.epoch += 1;
            s.fault = Some(error);
        });
    }

    /// Take the recorded fault, if any
    #[must_use]
    pub fn take_fault(&self) -> Option<Error> {
        let mut fault = None;
        self.state.send_if_modified(|s| {
            fault = s.fault.take();
            false
        });
        fault
    }

    /// Wait until every queued sentence has been played or dropped
    ///
    /// # Errors
    ///
    /// Returns the worker's fault (`PlaybackLost`, or `DeviceUnavailable`
    /// when the speaker could not be re-resolved) if it gave up on the turn
    pub async fn wait_idle(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.is_idle() || s.fault.is_some()).await;

        self.take_fault().map_or(Ok(()), Err)
    }

    /// Stop accepting sentences; the worker drains what is left and exits
    pub fn close(&self) {
        self.state.send_modify(|s| s.closed = true);
    }

    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.state.borrow().epoch == epoch
    }

    /// Number of sentences waiting (excluding the one playing)
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a sentence is currently leased
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.borrow().in_flight
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }
}
