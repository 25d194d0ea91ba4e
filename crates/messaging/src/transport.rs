use crate::message::{Message, MessageId};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for transport errors
pub trait TransportError: Debug + Error + Send + Sync + 'static {}

/// Delivers closed batches to the broker.
///
/// A transport is called at most once per batch. It either assigns one id per
/// message, in order, or fails the whole batch with a single error. Retries,
/// if any, happen inside the transport.
#[async_trait]
pub trait Transport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// Publishes `messages` as one batch.
    async fn dispatch(
        &self,
        ordering_key: Option<&str>,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, Self::Error>;
}
