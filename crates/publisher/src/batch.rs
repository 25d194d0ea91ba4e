//! Batches and the accumulator that decides when to close them

use crate::error::{DispatchError, Error, IdCountMismatch};
use crate::flow_control::FlowPermit;
use crate::handle::PublishHandle;
use crate::settings::BatchingSettings;

use std::sync::Arc;
use std::time::{Duration, Instant};

use proven_messaging::tracer::{TraceContext, Tracer};
use proven_messaging::{Message, MessageId};
use tokio::sync::oneshot;

/// A trace opened for one message, closed when it settles.
pub(crate) struct TracedPublish {
    pub(crate) context: TraceContext,
    pub(crate) tracer: Arc<dyn Tracer>,
}

/// Everything owed to the caller of one message.
pub(crate) struct Settlement {
    completion: oneshot::Sender<Result<MessageId, Error>>,
    _permit: Option<FlowPermit>,
    trace: Option<TracedPublish>,
}

impl Settlement {
    /// Consumes the settlement, so each caller hears back exactly once.
    fn resolve(self, result: Result<MessageId, Error>) {
        if let Some(TracedPublish { context, tracer }) = self.trace {
            match &result {
                Ok(id) => tracer.finish(context, Ok(id)),
                Err(error) => tracer.finish(context, Err(&error.to_string())),
            }
        }

        // The caller may have dropped its handle; the outcome is still settled.
        let _ = self.completion.send(result);
    }
}

/// A message waiting to join a batch.
pub(crate) struct PendingEntry {
    message: Message,
    settlement: Settlement,
}

impl PendingEntry {
    pub(crate) fn new(
        message: Message,
        trace: Option<TracedPublish>,
        permit: Option<FlowPermit>,
    ) -> (Self, PublishHandle) {
        let (completion, receiver) = oneshot::channel();

        let entry = Self {
            message,
            settlement: Settlement {
                completion,
                _permit: permit,
                trace,
            },
        };

        (entry, PublishHandle::new(receiver))
    }

    /// Settles an entry that never made it into a batch.
    pub(crate) fn reject(self, error: Error) {
        self.settlement.resolve(Err(error));
    }
}

/// An open batch, still accepting entries.
pub(crate) struct Batch {
    bytes: usize,
    created_at: Instant,
    id: u64,
    messages: Vec<Message>,
    settlements: Vec<Settlement>,
    thresholds: BatchingSettings,
}

impl Batch {
    fn new(id: u64, thresholds: BatchingSettings) -> Self {
        Self {
            bytes: 0,
            created_at: Instant::now(),
            id,
            messages: Vec::new(),
            settlements: Vec::new(),
            thresholds,
        }
    }

    fn can_fit(&self, size: usize) -> bool {
        self.messages.is_empty()
            || (self.messages.len() < self.thresholds.max_messages
                && self.bytes + size <= self.thresholds.max_bytes)
    }

    fn is_full(&self) -> bool {
        self.messages.len() >= self.thresholds.max_messages
            || self.bytes >= self.thresholds.max_bytes
    }

    fn add(&mut self, entry: PendingEntry) {
        self.bytes += entry.message.size();
        self.messages.push(entry.message);
        self.settlements.push(entry.settlement);
    }

    fn close(self) -> ClosedBatch {
        ClosedBatch {
            bytes: self.bytes,
            created_at: self.created_at,
            messages: self.messages,
            settlements: self.settlements,
        }
    }
}

/// A batch handed to dispatch. Its contents can no longer change.
pub(crate) struct ClosedBatch {
    bytes: usize,
    created_at: Instant,
    messages: Vec<Message>,
    settlements: Vec<Settlement>,
}

impl ClosedBatch {
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) const fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Checks that a successful result carries one id per entry.
    pub(crate) fn verify(
        &self,
        result: Result<Vec<MessageId>, DispatchError>,
    ) -> Result<Vec<MessageId>, DispatchError> {
        let expected = self.settlements.len();

        result.and_then(|ids| {
            if ids.len() == expected {
                Ok(ids)
            } else {
                Err(DispatchError::new(IdCountMismatch {
                    expected,
                    returned: ids.len(),
                }))
            }
        })
    }

    /// Hands each entry its id. `ids` must have passed [`Self::verify`].
    pub(crate) fn complete(self, ids: Vec<MessageId>) {
        for (settlement, id) in self.settlements.into_iter().zip(ids) {
            settlement.resolve(Ok(id));
        }
    }

    /// Delivers the transport's result to every entry. Returns the error the
    /// entries were failed with, if any.
    pub(crate) fn settle(
        self,
        result: Result<Vec<MessageId>, DispatchError>,
    ) -> Result<(), DispatchError> {
        match self.verify(result) {
            Ok(ids) => {
                self.complete(ids);
                Ok(())
            }
            Err(error) => {
                self.fail(&Error::Dispatch(error.clone()));
                Err(error)
            }
        }
    }

    /// Fails every entry with the same error.
    pub(crate) fn fail(self, error: &Error) {
        for settlement in self.settlements {
            settlement.resolve(Err(error.clone()));
        }
    }
}

/// Result of adding one entry to an [`Accumulator`].
#[derive(Default)]
pub(crate) struct Added {
    /// Batches closed by the add, oldest first. Zero, one or two.
    pub(crate) closed: Vec<ClosedBatch>,

    /// Set when the entry started a new batch that stayed open: the batch id
    /// and how long until it must close.
    pub(crate) deadline: Option<(u64, Duration)>,
}

/// Owns the open batch of a lane and applies the closing thresholds.
#[derive(Default)]
pub(crate) struct Accumulator {
    next_id: u64,
    open: Option<Batch>,
}

impl Accumulator {
    /// Adds an entry. Thresholds apply to batches created by this call only;
    /// an already-open batch keeps the thresholds it was created with.
    pub(crate) fn add(&mut self, entry: PendingEntry, thresholds: BatchingSettings) -> Added {
        let mut added = Added::default();
        let size = entry.message.size();

        if self.open.as_ref().is_some_and(|batch| !batch.can_fit(size)) {
            added.closed.extend(self.close());
        }

        let next_id = &mut self.next_id;
        let batch = self.open.get_or_insert_with(|| {
            *next_id += 1;
            Batch::new(*next_id, thresholds)
        });

        let fresh = batch.messages.is_empty();
        batch.add(entry);

        if batch.is_full() {
            added.closed.extend(self.close());
        } else if fresh {
            added.deadline = Some((batch.id, batch.thresholds.max_delay));
        }

        added
    }

    /// Closes the open batch, if any.
    pub(crate) fn close(&mut self) -> Option<ClosedBatch> {
        self.open.take().map(Batch::close)
    }

    /// Closes the open batch only if it is the one with `id`.
    pub(crate) fn close_expired(&mut self, id: u64) -> Option<ClosedBatch> {
        if self.open.as_ref().is_some_and(|batch| batch.id == id) {
            self.close()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.open.is_none()
    }
}
