//! The per-key lane: one batch in flight, latched shut by the first failure.

use crate::Error;
use crate::batch::{Accumulator, ClosedBatch, PendingEntry};
use crate::error::DispatchError;
use crate::lane::{Deadline, Lane, Pending, Rejected};
use crate::settings::PublisherSettings;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use proven_messaging::transport::Transport;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Latch {
    Open,
    Errored(DispatchError),
}

struct LaneState {
    accumulator: Accumulator,
    deadline: Deadline,
    in_flight: bool,
    latch: Latch,
    waiting: VecDeque<ClosedBatch>,
}

impl LaneState {
    /// Takes the next batch to send, if the lane may send one now.
    fn next_dispatch(&mut self) -> Option<ClosedBatch> {
        if self.in_flight || matches!(self.latch, Latch::Errored(_)) {
            return None;
        }

        let batch = self.waiting.pop_front()?;
        self.in_flight = true;
        Some(batch)
    }

    fn latched(&self) -> Option<DispatchError> {
        match &self.latch {
            Latch::Open => None,
            Latch::Errored(error) => Some(error.clone()),
        }
    }
}

struct LaneInner<T>
where
    T: Transport,
{
    drained_tx: mpsc::UnboundedSender<String>,
    key: String,
    pending: Pending,
    settings: Arc<RwLock<PublisherSettings>>,
    state: Mutex<LaneState>,
    transport: T,
}

/// Lane for one ordering key.
#[derive(Clone)]
pub(crate) struct SequencedQueue<T>
where
    T: Transport,
{
    inner: Arc<LaneInner<T>>,
}

impl<T> SequencedQueue<T>
where
    T: Transport,
{
    pub(crate) fn new(
        key: String,
        transport: T,
        settings: Arc<RwLock<PublisherSettings>>,
        drained_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            inner: Arc::new(LaneInner {
                drained_tx,
                key,
                pending: Pending::new(),
                settings,
                state: Mutex::new(LaneState {
                    accumulator: Accumulator::default(),
                    deadline: Deadline::default(),
                    in_flight: false,
                    latch: Latch::Open,
                    waiting: VecDeque::new(),
                }),
                transport,
            }),
        }
    }

    /// Clears the latch so the key accepts messages again.
    pub(crate) fn resume(&self) {
        let mut state = self.inner.state.lock();
        if matches!(state.latch, Latch::Errored(_)) {
            info!(ordering_key = %self.inner.key, "resuming publishing");
            state.latch = Latch::Open;
        }
    }

    /// The failure the lane is latched on, if any.
    pub(crate) fn latched(&self) -> Option<DispatchError> {
        self.inner.state.lock().latched()
    }

    /// Messages accepted but not yet settled.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.inner.pending.count()
    }
}

impl<T> LaneInner<T>
where
    T: Transport,
{
    fn add(self: &Arc<Self>, entry: PendingEntry) -> Result<(), Rejected> {
        let thresholds = self.settings.read().batching;

        let next = {
            let mut state = self.state.lock();

            if let Some(source) = state.latched() {
                let error = Error::Ordering {
                    key: self.key.clone(),
                    source,
                };
                return Err(Rejected { entry, error });
            }

            self.pending.increment();
            let added = state.accumulator.add(entry, thresholds);

            if !added.closed.is_empty() {
                state.deadline.cancel();
            }
            if let Some((batch_id, delay)) = added.deadline {
                state.deadline.arm(self.arm_deadline(batch_id, delay));
            }

            state.waiting.extend(added.closed);
            state.next_dispatch()
        };

        if let Some(batch) = next {
            self.dispatch(batch);
        }

        Ok(())
    }

    fn arm_deadline(self: &Arc<Self>, batch_id: u64, delay: Duration) -> AbortHandle {
        let inner = Arc::downgrade(self);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };

            let next = {
                let mut state = inner.state.lock();
                if let Some(batch) = state.accumulator.close_expired(batch_id) {
                    debug!(ordering_key = %inner.key, batch_id, "max delay reached");
                    state.deadline.fired();
                    state.waiting.push_back(batch);
                }
                state.next_dispatch()
            };

            if let Some(batch) = next {
                inner.dispatch(batch);
            }
        })
        .abort_handle()
    }

    fn close_open(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            if let Some(batch) = state.accumulator.close() {
                state.deadline.cancel();
                state.waiting.push_back(batch);
            }
            state.next_dispatch()
        };

        if let Some(batch) = next {
            self.dispatch(batch);
        }
    }

    fn dispatch(self: &Arc<Self>, batch: ClosedBatch) {
        let inner = self.clone();

        tokio::spawn(async move {
            let messages = batch.len();
            debug!(
                ordering_key = %inner.key,
                messages,
                bytes = batch.bytes(),
                age = ?batch.age(),
                "dispatching batch"
            );

            let result = inner
                .transport
                .dispatch(Some(inner.key.as_str()), batch.messages())
                .await
                .map_err(DispatchError::new);

            match batch.verify(result) {
                Ok(ids) => {
                    batch.complete(ids);
                    inner.succeeded(messages);
                }
                Err(error) => inner.failed(batch, error),
            }
        });
    }

    fn succeeded(self: &Arc<Self>, messages: usize) {
        let (next, drained) = {
            let mut state = self.state.lock();
            state.in_flight = false;
            let next = state.next_dispatch();
            (next, self.pending.release(messages))
        };

        if let Some(batch) = next {
            self.dispatch(batch);
        }

        if drained {
            self.notify_drained();
        }
    }

    /// Latches the lane before any entry of the failed batch settles.
    fn failed(&self, batch: ClosedBatch, error: DispatchError) {
        warn!(
            ordering_key = %self.key,
            messages = batch.len(),
            %error,
            "batch publish failed, pausing ordering key"
        );

        let abandoned: Vec<ClosedBatch> = {
            let mut state = self.state.lock();
            state.in_flight = false;
            state.latch = Latch::Errored(error.clone());

            let mut abandoned = vec![batch];
            abandoned.extend(state.waiting.drain(..));
            abandoned.extend(state.accumulator.close());
            state.deadline.cancel();
            abandoned
        };

        let failure = Error::Dispatch(error);
        let mut released = 0;
        for batch in abandoned {
            released += batch.len();
            batch.fail(&failure);
        }

        if self.pending.release(released) {
            self.notify_drained();
        }
    }

    fn notify_drained(&self) {
        // The receiver is gone once the publisher is dropped.
        let _ = self.drained_tx.send(self.key.clone());
    }
}

#[async_trait]
impl<T> Lane for SequencedQueue<T>
where
    T: Transport,
{
    fn add(&self, entry: PendingEntry) -> Result<(), Rejected> {
        self.inner.add(entry)
    }

    async fn flush(&self) -> Result<(), Error> {
        if let Some(error) = self.latched() {
            return Err(Error::Dispatch(error));
        }

        self.inner.close_open();
        self.inner.pending.drained().await;

        self.latched().map_or(Ok(()), |error| Err(Error::Dispatch(error)))
    }

    fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        self.inner.pending.count() == 0 && matches!(state.latch, Latch::Open)
    }
}
