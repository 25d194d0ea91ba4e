//! Publisher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on batch size in bytes, below the broker's request limit.
pub const MAX_BATCH_BYTES_CEILING: usize = 9 * 1024 * 1024;

/// Upper bound on messages per batch.
pub const MAX_BATCH_MESSAGES_CEILING: usize = 1000;

/// Thresholds that close a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingSettings {
    /// Close once the batch holds at least this many bytes
    pub max_bytes: usize,

    /// Close once the batch is this old, measured from its first message
    pub max_delay: Duration,

    /// Close once the batch holds this many messages
    pub max_messages: usize,
}

impl BatchingSettings {
    /// Returns the settings with both size thresholds clamped to their ceilings.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            max_bytes: self.max_bytes.min(MAX_BATCH_BYTES_CEILING),
            max_delay: self.max_delay,
            max_messages: self.max_messages.min(MAX_BATCH_MESSAGES_CEILING),
        }
    }
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,               // 1MiB
            max_delay: Duration::from_millis(10), // 10ms
            max_messages: 100,
        }
    }
}

/// What to do with an ordering key while message ordering is disabled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingKeyPolicy {
    /// Strip the key and publish the message unordered
    Ignore,

    /// Fail the publish with a validation error
    #[default]
    Reject,
}

/// What to do when a flow control limit would be exceeded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitExceededBehavior {
    /// Fail the publish
    Error,

    /// Track outstanding work but never refuse it
    #[default]
    Ignore,
}

/// Limits on work accepted but not yet settled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControlSettings {
    /// Behavior once a limit is reached
    #[serde(default)]
    pub limit_exceeded_behavior: LimitExceededBehavior,

    /// Maximum outstanding bytes
    #[serde(default)]
    pub max_outstanding_bytes: Option<usize>,

    /// Maximum outstanding messages
    #[serde(default)]
    pub max_outstanding_messages: Option<usize>,
}

/// Effective publisher settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherSettings {
    /// Batch thresholds
    pub batching: BatchingSettings,

    /// Outstanding work limits
    pub flow_control: FlowControlSettings,

    /// Route keyed messages to per-key sequenced lanes
    pub ordering_enabled: bool,

    /// Handling of keyed messages while ordering is disabled
    pub ordering_key_policy: OrderingKeyPolicy,

    /// Open a trace for every message
    pub tracing_enabled: bool,
}

impl PublisherSettings {
    /// Merges `options` into these settings. Omitted fields keep their
    /// current values; batch size thresholds are clamped to their ceilings.
    pub fn apply(&mut self, options: PublisherOptions) {
        if let Some(batching) = options.batching {
            if let Some(max_bytes) = batching.max_bytes {
                self.batching.max_bytes = max_bytes;
            }
            if let Some(max_delay) = batching.max_delay {
                self.batching.max_delay = max_delay;
            }
            if let Some(max_messages) = batching.max_messages {
                self.batching.max_messages = max_messages;
            }
        }
        self.batching = self.batching.clamped();

        if let Some(flow_control) = options.flow_control {
            self.flow_control = flow_control;
        }
        if let Some(ordering_enabled) = options.ordering_enabled {
            self.ordering_enabled = ordering_enabled;
        }
        if let Some(ordering_key_policy) = options.ordering_key_policy {
            self.ordering_key_policy = ordering_key_policy;
        }
        if let Some(tracing_enabled) = options.tracing_enabled {
            self.tracing_enabled = tracing_enabled;
        }
    }

    /// Default settings with `options` applied.
    #[must_use]
    pub fn from_options(options: PublisherOptions) -> Self {
        let mut settings = Self::default();
        settings.apply(options);
        settings
    }
}

/// Partial batch thresholds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingOptions {
    /// See [`BatchingSettings::max_bytes`]
    #[serde(alias = "maxBytes")]
    pub max_bytes: Option<usize>,

    /// See [`BatchingSettings::max_delay`]
    #[serde(alias = "maxDelay")]
    pub max_delay: Option<Duration>,

    /// See [`BatchingSettings::max_messages`]
    #[serde(alias = "maxMessages")]
    pub max_messages: Option<usize>,
}

/// Partial publisher settings, as accepted by `set_options`. Unknown fields
/// are ignored when deserializing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherOptions {
    /// Batch thresholds to change
    pub batching: Option<BatchingOptions>,

    /// Replacement flow control limits
    #[serde(alias = "flowControl")]
    pub flow_control: Option<FlowControlSettings>,

    /// Enable or disable ordered lanes
    #[serde(alias = "orderingEnabled")]
    pub ordering_enabled: Option<bool>,

    /// Handling of keyed messages while ordering is disabled
    #[serde(alias = "orderingKeyPolicy")]
    pub ordering_key_policy: Option<OrderingKeyPolicy>,

    /// Enable or disable tracing
    #[serde(alias = "tracingEnabled")]
    pub tracing_enabled: Option<bool>,
}
