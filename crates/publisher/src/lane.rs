use crate::Error;
use crate::batch::PendingEntry;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// An entry the lane refused, handed back so the caller can settle it.
pub(crate) struct Rejected {
    pub(crate) entry: PendingEntry,
    pub(crate) error: Error,
}

/// Shared surface of the unordered lane and the per-key sequenced lanes.
#[async_trait]
pub(crate) trait Lane: Send + Sync {
    /// Queues an entry without waiting on I/O.
    fn add(&self, entry: PendingEntry) -> Result<(), Rejected>;

    /// Closes the open batch and waits until nothing is pending.
    async fn flush(&self) -> Result<(), Error>;

    /// True when the lane holds no work and can be dropped.
    fn is_idle(&self) -> bool;
}

/// Count of messages a lane has accepted but not yet settled.
#[derive(Debug)]
pub(crate) struct Pending(watch::Sender<usize>);

impl Pending {
    pub(crate) fn new() -> Self {
        Self(watch::channel(0).0)
    }

    pub(crate) fn count(&self) -> usize {
        *self.0.borrow()
    }

    pub(crate) fn increment(&self) {
        self.0.send_modify(|pending| *pending += 1);
    }

    /// Returns true when this release drained the lane.
    pub(crate) fn release(&self, count: usize) -> bool {
        let mut drained = false;
        self.0.send_modify(|pending| {
            *pending -= count;
            drained = *pending == 0;
        });
        drained
    }

    pub(crate) async fn drained(&self) {
        let mut receiver = self.0.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = receiver.wait_for(|pending| *pending == 0).await;
    }
}

/// The max-delay timer of a lane's open batch. At most one is armed; closing
/// the batch early cancels it.
#[derive(Debug, Default)]
pub(crate) struct Deadline(Option<AbortHandle>);

impl Deadline {
    /// Arms a timer, cancelling any previous one.
    pub(crate) fn arm(&mut self, timer: AbortHandle) {
        self.cancel();
        self.0 = Some(timer);
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.0.take() {
            timer.abort();
        }
    }

    /// Forgets the timer once it has fired.
    pub(crate) fn fired(&mut self) {
        self.0 = None;
    }

    #[cfg(test)]
    pub(crate) const fn is_armed(&self) -> bool {
        self.0.is_some()
    }
}
