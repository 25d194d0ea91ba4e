use crate::Error;
use crate::batch::{PendingEntry, TracedPublish};
use crate::flow_control::FlowController;
use crate::handle::PublishHandle;
use crate::lane::{Lane, Rejected};
use crate::ordered::SequencedQueue;
use crate::queue::FlowQueue;
use crate::settings::{OrderingKeyPolicy, PublisherOptions, PublisherSettings};
use crate::trace::{SpanTracer, TRACE_CONTEXT_ATTRIBUTE};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use proven_messaging::Message;
use proven_messaging::tracer::Tracer;
use proven_messaging::transport::Transport;
use proven_messaging::validation::{DefaultValidator, ValidationError, Validator};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Routing<T>
where
    T: Transport,
{
    drained: mpsc::UnboundedReceiver<String>,
    lanes: HashMap<String, SequencedQueue<T>>,
}

impl<T> Routing<T>
where
    T: Transport,
{
    /// Drops lanes that reported themselves drained and are still idle.
    fn reap(&mut self) {
        while let Ok(key) = self.drained.try_recv() {
            if self.lanes.get(&key).is_some_and(|lane| lane.is_idle()) {
                debug!(ordering_key = %key, "removing idle ordering lane");
                self.lanes.remove(&key);
            }
        }
    }
}

/// Batches messages and hands them to a transport, keeping per-key order for
/// messages with an ordering key.
///
/// Call [`Publisher::flush`] before dropping: messages still in an open batch
/// are never sent and their handles resolve to [`Error::Abandoned`].
pub struct Publisher<T>
where
    T: Transport,
{
    default_lane: FlowQueue<T>,
    drained_tx: mpsc::UnboundedSender<String>,
    flow_control: Arc<FlowController>,
    routing: Mutex<Routing<T>>,
    settings: Arc<RwLock<PublisherSettings>>,
    tracer: Arc<dyn Tracer>,
    transport: T,
    validator: Arc<dyn Validator>,
}

impl<T> Publisher<T>
where
    T: Transport,
{
    /// Creates a new `Publisher`. Batch thresholds above their ceilings are
    /// clamped.
    #[must_use]
    pub fn new(transport: T, mut settings: PublisherSettings) -> Self {
        settings.batching = settings.batching.clamped();
        let settings = Arc::new(RwLock::new(settings));
        let (drained_tx, drained) = mpsc::unbounded_channel();

        Self {
            default_lane: FlowQueue::new(transport.clone(), settings.clone()),
            drained_tx,
            flow_control: Arc::new(FlowController::default()),
            routing: Mutex::new(Routing {
                drained,
                lanes: HashMap::new(),
            }),
            settings,
            tracer: Arc::new(SpanTracer),
            transport,
            validator: Arc::new(DefaultValidator),
        }
    }

    /// Replaces the message validator.
    #[must_use]
    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Validator,
    {
        self.validator = Arc::new(validator);
        self
    }

    /// Replaces the tracer used while tracing is enabled.
    #[must_use]
    pub fn with_tracer<R>(mut self, tracer: R) -> Self
    where
        R: Tracer,
    {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish_message`].
    pub fn publish<M>(&self, message: M) -> Result<PublishHandle, Error>
    where
        M: Into<Message>,
    {
        self.publish_message(message.into())
    }

    /// Validates `message` and queues it on its lane. The returned handle
    /// resolves once the batch carrying the message settles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the message is malformed or carries
    /// an ordering key that the ordering policy rejects,
    /// [`Error::FlowControl`] if a flow control limit is reached, and
    /// [`Error::Ordering`] if its ordering key is paused.
    pub fn publish_message(&self, mut message: Message) -> Result<PublishHandle, Error> {
        self.validator.validate(&message)?;

        let (ordering_enabled, policy, tracing_enabled, flow_control) = {
            let settings = self.settings.read();
            (
                settings.ordering_enabled,
                settings.ordering_key_policy,
                settings.tracing_enabled,
                settings.flow_control,
            )
        };

        if !ordering_enabled {
            if let Some(key) = message.ordering_key() {
                match policy {
                    OrderingKeyPolicy::Reject => {
                        return Err(ValidationError::OrderingDisabled(key.to_string()).into());
                    }
                    OrderingKeyPolicy::Ignore => {
                        debug!(ordering_key = %key, "ordering disabled, publishing unordered");
                        message.take_ordering_key();
                    }
                }
            }
        }

        let permit = self.flow_control.acquire(message.size(), &flow_control)?;

        let trace = if tracing_enabled {
            self.tracer.start(&message).map(|context| {
                let replaced =
                    message.insert_attribute(TRACE_CONTEXT_ATTRIBUTE, context.traceparent());
                if let Some(replaced) = replaced {
                    warn!(
                        attribute = TRACE_CONTEXT_ATTRIBUTE,
                        %replaced,
                        "overwriting reserved trace attribute"
                    );
                }

                TracedPublish {
                    context,
                    tracer: self.tracer.clone(),
                }
            })
        } else {
            None
        };

        let key = message.ordering_key().map(ToString::to_string);
        let (entry, handle) = PendingEntry::new(message, trace, Some(permit));

        let added = match key {
            None => self.default_lane.add(entry),
            Some(key) => {
                let mut routing = self.routing.lock();
                routing.reap();

                let lane = routing.lanes.entry(key.clone()).or_insert_with(|| {
                    debug!(ordering_key = %key, "creating ordering lane");
                    SequencedQueue::new(
                        key,
                        self.transport.clone(),
                        self.settings.clone(),
                        self.drained_tx.clone(),
                    )
                });
                lane.add(entry)
            }
        };

        match added {
            Ok(()) => Ok(handle),
            Err(Rejected { entry, error }) => {
                entry.reject(error.clone());
                Err(error)
            }
        }
    }

    /// Sends every open batch and waits until all accepted messages settle.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a lane; an ordering lane reports
    /// the failure it is paused on.
    pub async fn flush(&self) -> Result<(), Error> {
        let mut lanes: Vec<Box<dyn Lane>> = vec![Box::new(self.default_lane.clone())];
        {
            let mut routing = self.routing.lock();
            routing.reap();
            lanes.extend(
                routing
                    .lanes
                    .values()
                    .map(|lane| Box::new(lane.clone()) as Box<dyn Lane>),
            );
        }

        debug!(lanes = lanes.len(), "flushing publisher");

        join_all(lanes.iter().map(|lane| lane.flush()))
            .await
            .into_iter()
            .find_map(Result::err)
            .map_or(Ok(()), Err)
    }

    /// Like [`Publisher::flush`], but gives up waiting after `duration`.
    /// Batches already sent still settle in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlushTimeout`] if the wait expired, otherwise as
    /// [`Publisher::flush`].
    pub async fn flush_timeout(&self, duration: Duration) -> Result<(), Error> {
        tokio::time::timeout(duration, self.flush())
            .await
            .map_err(|_| Error::FlushTimeout(duration))?
    }

    /// Reopens an ordering key paused by a failed batch. Unknown keys are
    /// ignored.
    pub fn resume_publishing(&self, ordering_key: &str) {
        let mut routing = self.routing.lock();

        let Some(lane) = routing.lanes.get(ordering_key) else {
            debug!(ordering_key, "resume for unknown ordering key");
            return;
        };

        lane.resume();
        if lane.is_idle() {
            routing.lanes.remove(ordering_key);
        }
    }

    /// Merges `options` into the current settings. Batches already open keep
    /// the thresholds they were created with.
    pub fn set_options(&self, options: PublisherOptions) {
        let mut settings = self.settings.write();
        settings.apply(options);
        info!(settings = ?*settings, "publisher options updated");
    }

    /// A snapshot of the effective settings.
    #[must_use]
    pub fn settings(&self) -> PublisherSettings {
        self.settings.read().clone()
    }

    /// Ordering keys with a live lane.
    #[must_use]
    pub fn ordering_keys(&self) -> Vec<String> {
        let mut routing = self.routing.lock();
        routing.reap();
        routing.lanes.keys().cloned().collect()
    }

    /// Messages accepted but not yet settled.
    #[must_use]
    pub fn outstanding_messages(&self) -> usize {
        self.flow_control.outstanding_messages()
    }

    /// Bytes accepted but not yet settled.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.flow_control.outstanding_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proven_messaging_memory::MemoryTransport;
    use tracing_test::traced_test;

    fn traced() -> PublisherSettings {
        PublisherSettings {
            tracing_enabled: true,
            ..PublisherSettings::default()
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_overwriting_trace_attribute_warns() {
        let publisher = Publisher::new(MemoryTransport::default(), traced());

        let message = Message::new("payload").with_attribute(TRACE_CONTEXT_ATTRIBUTE, "mine");
        let handle = publisher.publish(message).unwrap();
        publisher.flush().await.unwrap();

        assert!(handle.await.is_ok());
        assert!(logs_contain("overwriting reserved trace attribute"));
        assert!(logs_contain("message published"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fresh_trace_attribute_does_not_warn() {
        let publisher = Publisher::new(MemoryTransport::default(), traced());

        let handle = publisher.publish("payload").unwrap();
        publisher.flush().await.unwrap();

        assert!(handle.await.is_ok());
        assert!(!logs_contain("overwriting reserved trace attribute"));
    }

    #[tokio::test]
    async fn test_routing_reaps_only_idle_lanes() {
        let publisher = Publisher::new(
            MemoryTransport::default(),
            PublisherSettings {
                ordering_enabled: true,
                ..PublisherSettings::default()
            },
        );

        let handle = publisher
            .publish(Message::new("a").with_ordering_key("k"))
            .unwrap();

        // A stale notification for a busy lane leaves it in place.
        publisher.drained_tx.send("k".to_string()).unwrap();
        assert_eq!(publisher.ordering_keys(), vec!["k".to_string()]);

        publisher.flush().await.unwrap();
        assert!(handle.await.is_ok());
        assert!(publisher.ordering_keys().is_empty());
    }
}
