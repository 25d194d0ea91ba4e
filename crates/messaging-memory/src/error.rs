use proven_messaging::transport::TransportError;
use thiserror::Error;

/// Error type for in-memory transport operations.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The dispatch gate was closed while a batch waited on it.
    #[error("dispatch gate closed")]
    GateClosed,

    /// A failure scheduled with `fail_next` or `fail_ordering_key`.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl TransportError for Error {}
