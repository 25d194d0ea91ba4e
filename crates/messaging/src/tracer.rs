use crate::message::{Message, MessageId};

use tracing::Span;

/// Per-message trace state threaded from enqueue to settlement.
#[derive(Clone, Debug)]
pub struct TraceContext {
    span: Span,
    traceparent: String,
}

impl TraceContext {
    /// Creates a context from a span and its propagation token.
    #[must_use]
    pub const fn new(span: Span, traceparent: String) -> Self {
        Self { span, traceparent }
    }

    /// The span covering the publish.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// The propagation token written into the message attributes.
    #[must_use]
    pub fn traceparent(&self) -> &str {
        &self.traceparent
    }
}

/// Opens a trace for a message about to be queued and closes it once the
/// message settles.
pub trait Tracer: Send + Sync + 'static {
    /// Starts tracing `message`. Returning `None` leaves the message untraced.
    fn start(&self, message: &Message) -> Option<TraceContext>;

    /// Closes the trace with the publish outcome.
    fn finish(&self, context: TraceContext, outcome: Result<&MessageId, &str>);
}
