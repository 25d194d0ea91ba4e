use crate::Error;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use proven_messaging::MessageId;
use tokio::sync::oneshot;

/// Resolves to the outcome of a single published message.
///
/// Dropping the handle does not cancel the publish.
#[derive(Debug)]
#[must_use = "the publish outcome is only observable through the handle"]
pub struct PublishHandle {
    receiver: oneshot::Receiver<Result<MessageId, Error>>,
}

impl PublishHandle {
    pub(crate) const fn new(receiver: oneshot::Receiver<Result<MessageId, Error>>) -> Self {
        Self { receiver }
    }
}

impl Future for PublishHandle {
    type Output = Result<MessageId, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Abandoned)))
    }
}
