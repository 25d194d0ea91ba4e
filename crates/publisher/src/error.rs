use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use proven_messaging::validation::ValidationError;
use thiserror::Error;

/// A transport failure, shared by every message of the batch it failed.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct DispatchError(Arc<dyn StdError + Send + Sync>);

impl DispatchError {
    /// Wraps a transport error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// The underlying transport error.
    #[must_use]
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

#[derive(Debug, Error)]
#[error("transport returned {returned} ids for a batch of {expected} messages")]
pub(crate) struct IdCountMismatch {
    pub(crate) expected: usize,
    pub(crate) returned: usize,
}

/// Error type for publisher operations.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The message's completion was dropped without a result.
    #[error("publish abandoned before a result was delivered")]
    Abandoned,

    /// The transport failed the batch carrying the message.
    #[error("publish failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Accepting the message would exceed a flow control limit.
    #[error("flow control limit of {limit} outstanding {unit} reached")]
    FlowControl {
        /// The configured limit.
        limit: usize,
        /// `"messages"` or `"bytes"`.
        unit: &'static str,
    },

    /// A flush did not drain before its deadline.
    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),

    /// The ordering key is paused after an earlier batch for it failed.
    #[error("publishing paused for ordering key `{key}`: {source}")]
    Ordering {
        /// The paused ordering key.
        key: String,
        /// The failure that paused it.
        source: DispatchError,
    },

    /// The message was rejected before reaching a batch.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
