//! The unordered lane: batches may be in flight concurrently.

use crate::Error;
use crate::batch::{Accumulator, ClosedBatch, PendingEntry};
use crate::error::DispatchError;
use crate::lane::{Deadline, Lane, Pending, Rejected};
use crate::settings::PublisherSettings;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use proven_messaging::transport::Transport;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

struct QueueState {
    accumulator: Accumulator,
    deadline: Deadline,
    in_flight: usize,
}

struct QueueInner<T>
where
    T: Transport,
{
    pending: Pending,
    settings: Arc<RwLock<PublisherSettings>>,
    state: Mutex<QueueState>,
    transport: T,
}

/// Lane for messages without an ordering key.
#[derive(Clone)]
pub(crate) struct FlowQueue<T>
where
    T: Transport,
{
    inner: Arc<QueueInner<T>>,
}

impl<T> FlowQueue<T>
where
    T: Transport,
{
    pub(crate) fn new(transport: T, settings: Arc<RwLock<PublisherSettings>>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Pending::new(),
                settings,
                state: Mutex::new(QueueState {
                    accumulator: Accumulator::default(),
                    deadline: Deadline::default(),
                    in_flight: 0,
                }),
                transport,
            }),
        }
    }

    /// Batches currently awaiting a transport result.
    pub(crate) fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Messages accepted but not yet settled.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.inner.pending.count()
    }
}

impl<T> QueueInner<T>
where
    T: Transport,
{
    fn add(self: &Arc<Self>, entry: PendingEntry) {
        let thresholds = self.settings.read().batching;

        let closed = {
            let mut state = self.state.lock();
            self.pending.increment();
            let added = state.accumulator.add(entry, thresholds);
            state.in_flight += added.closed.len();

            if !added.closed.is_empty() {
                state.deadline.cancel();
            }
            if let Some((batch_id, delay)) = added.deadline {
                state.deadline.arm(self.arm_deadline(batch_id, delay));
            }
            added.closed
        };

        for batch in closed {
            self.dispatch(batch);
        }
    }

    fn arm_deadline(self: &Arc<Self>, batch_id: u64, delay: Duration) -> AbortHandle {
        let inner = Arc::downgrade(self);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };

            let expired = {
                let mut state = inner.state.lock();
                let expired = state.accumulator.close_expired(batch_id);
                if expired.is_some() {
                    state.deadline.fired();
                    state.in_flight += 1;
                }
                expired
            };

            if let Some(batch) = expired {
                debug!(batch_id, "max delay reached");
                inner.dispatch(batch);
            }
        })
        .abort_handle()
    }

    fn close_open(self: &Arc<Self>) {
        let closed = {
            let mut state = self.state.lock();
            let closed = state.accumulator.close();
            if closed.is_some() {
                state.deadline.cancel();
                state.in_flight += 1;
            }
            closed
        };

        if let Some(batch) = closed {
            self.dispatch(batch);
        }
    }

    fn dispatch(self: &Arc<Self>, batch: ClosedBatch) {
        let inner = self.clone();

        tokio::spawn(async move {
            let messages = batch.len();
            debug!(
                messages,
                bytes = batch.bytes(),
                age = ?batch.age(),
                "dispatching batch"
            );

            let result = inner
                .transport
                .dispatch(None, batch.messages())
                .await
                .map_err(DispatchError::new);

            if let Err(error) = batch.settle(result) {
                warn!(messages, %error, "batch publish failed");
            }

            let mut state = inner.state.lock();
            state.in_flight -= 1;
            inner.pending.release(messages);
        });
    }
}

#[async_trait]
impl<T> Lane for FlowQueue<T>
where
    T: Transport,
{
    fn add(&self, entry: PendingEntry) -> Result<(), Rejected> {
        self.inner.add(entry);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        debug!(in_flight = self.in_flight(), "flushing unordered lane");
        self.inner.close_open();
        self.inner.pending.drained().await;
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.inner.pending.count() == 0
    }
}
