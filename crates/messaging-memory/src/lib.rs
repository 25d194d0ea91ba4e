//! In-memory implementation of the publish transport for local development
//! and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proven_messaging::transport::Transport;
use proven_messaging::{Message, MessageId};
use tokio::sync::{Mutex, Semaphore, watch};
use tracing::debug;

/// Options for the in-memory transport.
#[derive(Clone, Debug, Default)]
pub struct MemoryTransportOptions {
    /// Hold every dispatch until it is let through with
    /// [`MemoryTransport::release`].
    pub gated: bool,

    /// Delay applied to every dispatch before it completes.
    pub latency: Option<Duration>,
}

/// A batch as the transport received it.
#[derive(Clone, Debug)]
pub struct DispatchedBatch {
    /// Ordering key of the lane that sent the batch.
    pub ordering_key: Option<String>,

    /// The messages, in batch order.
    pub messages: Vec<Message>,
}

#[derive(Debug, Default)]
struct Concurrency {
    current: usize,
    max: usize,
}

#[derive(Debug)]
struct State {
    concurrency: Mutex<HashMap<Option<String>, Concurrency>>,
    dispatch_count: watch::Sender<usize>,
    dispatched: Mutex<Vec<DispatchedBatch>>,
    fail_next: Mutex<VecDeque<String>>,
    failing_keys: Mutex<HashMap<String, String>>,
    gate: Option<Semaphore>,
    latency: Option<Duration>,
    next_id: AtomicU64,
}

/// In-memory transport that records every batch and assigns sequential ids.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    state: Arc<State>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(MemoryTransportOptions::default())
    }
}

impl MemoryTransport {
    /// Creates a new `MemoryTransport`.
    #[must_use]
    pub fn new(options: MemoryTransportOptions) -> Self {
        let (dispatch_count, _) = watch::channel(0);

        Self {
            state: Arc::new(State {
                concurrency: Mutex::new(HashMap::new()),
                dispatch_count,
                dispatched: Mutex::new(Vec::new()),
                fail_next: Mutex::new(VecDeque::new()),
                failing_keys: Mutex::new(HashMap::new()),
                gate: options.gated.then(|| Semaphore::new(0)),
                latency: options.latency,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Every batch received so far, in the order dispatch was called.
    pub async fn dispatched(&self) -> Vec<DispatchedBatch> {
        self.state.dispatched.lock().await.clone()
    }

    /// Fails the next dispatch call, whatever lane it comes from.
    pub async fn fail_next<R>(&self, reason: R)
    where
        R: Into<String>,
    {
        self.state.fail_next.lock().await.push_back(reason.into());
    }

    /// Fails every dispatch for `ordering_key` until cleared.
    pub async fn fail_ordering_key<K, R>(&self, ordering_key: K, reason: R)
    where
        K: Into<String>,
        R: Into<String>,
    {
        self.state
            .failing_keys
            .lock()
            .await
            .insert(ordering_key.into(), reason.into());
    }

    /// Drops every scheduled failure.
    pub async fn clear_failures(&self) {
        self.state.fail_next.lock().await.clear();
        self.state.failing_keys.lock().await.clear();
    }

    /// Lets `batches` held dispatches complete. No-op when not gated.
    pub fn release(&self, batches: usize) {
        if let Some(gate) = &self.state.gate {
            gate.add_permits(batches);
        }
    }

    /// Fails every held and future dispatch with [`Error::GateClosed`].
    /// No-op when not gated.
    pub fn close_gate(&self) {
        if let Some(gate) = &self.state.gate {
            gate.close();
        }
    }

    /// Waits until at least `count` dispatch calls have started.
    pub async fn wait_for_dispatches(&self, count: usize) {
        let mut receiver = self.state.dispatch_count.subscribe();
        let _ = receiver.wait_for(|dispatched| *dispatched >= count).await;
    }

    /// Highest number of simultaneous dispatches seen for `ordering_key`.
    pub async fn max_concurrency(&self, ordering_key: Option<&str>) -> usize {
        self.state
            .concurrency
            .lock()
            .await
            .get(&ordering_key.map(ToString::to_string))
            .map_or(0, |concurrency| concurrency.max)
    }

    async fn take_failure(&self, ordering_key: Option<&str>) -> Option<String> {
        if let Some(reason) = self.state.fail_next.lock().await.pop_front() {
            return Some(reason);
        }

        let key = ordering_key?;
        self.state.failing_keys.lock().await.get(key).cloned()
    }

    async fn enter(&self, ordering_key: &Option<String>) {
        let mut concurrency = self.state.concurrency.lock().await;
        let entry = concurrency.entry(ordering_key.clone()).or_default();
        entry.current += 1;
        entry.max = entry.max.max(entry.current);
    }

    async fn exit(&self, ordering_key: &Option<String>) {
        if let Some(entry) = self.state.concurrency.lock().await.get_mut(ordering_key) {
            entry.current -= 1;
        }
    }

    async fn complete(&self, failure: Option<String>, len: usize) -> Result<Vec<MessageId>, Error> {
        if let Some(gate) = &self.state.gate {
            gate.acquire().await.map_err(|_| Error::GateClosed)?.forget();
        }

        if let Some(latency) = self.state.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(reason) = failure {
            return Err(Error::Injected(reason));
        }

        Ok((0..len)
            .map(|_| {
                self.state
                    .next_id
                    .fetch_add(1, Ordering::Relaxed)
                    .to_string()
            })
            .collect())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;

    async fn dispatch(
        &self,
        ordering_key: Option<&str>,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, Self::Error> {
        let owned_key = ordering_key.map(ToString::to_string);
        let failure = self.take_failure(ordering_key).await;

        self.state.dispatched.lock().await.push(DispatchedBatch {
            ordering_key: owned_key.clone(),
            messages: messages.to_vec(),
        });
        self.enter(&owned_key).await;
        self.state.dispatch_count.send_modify(|count| *count += 1);

        debug!(
            ordering_key = ?owned_key,
            messages = messages.len(),
            failing = failure.is_some(),
            "memory transport received batch"
        );

        let result = self.complete(failure, messages.len()).await;
        self.exit(&owned_key).await;

        result
    }
}
