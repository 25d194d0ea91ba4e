//! Tracing-backed implementation of the publish tracer.

use proven_messaging::tracer::{TraceContext, Tracer};
use proven_messaging::{Message, MessageId};
use tracing::{debug, field, info_span, warn};
use uuid::Uuid;

/// Attribute carrying the trace context of a traced message. Publishing
/// with tracing enabled overwrites any value the caller put here.
pub const TRACE_CONTEXT_ATTRIBUTE: &str = "proven_traceparent";

/// Opens a `publish` span per message and propagates a W3C-style
/// `traceparent` token through [`TRACE_CONTEXT_ATTRIBUTE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SpanTracer;

impl SpanTracer {
    fn traceparent() -> String {
        let trace_id = Uuid::new_v4().simple();
        let (span_id, _) = Uuid::new_v4().as_u64_pair();

        format!("00-{trace_id}-{span_id:016x}-01")
    }
}

impl Tracer for SpanTracer {
    fn start(&self, message: &Message) -> Option<TraceContext> {
        let traceparent = Self::traceparent();

        let span = info_span!(
            "publish",
            ordering_key = message.ordering_key().unwrap_or_default(),
            size = message.size(),
            traceparent = %traceparent,
            message_id = field::Empty,
            outcome = field::Empty,
        );

        Some(TraceContext::new(span, traceparent))
    }

    fn finish(&self, context: TraceContext, outcome: Result<&MessageId, &str>) {
        let span = context.span();

        match outcome {
            Ok(message_id) => {
                span.record("message_id", message_id.as_str());
                span.record("outcome", "published");
                span.in_scope(|| debug!(%message_id, "message published"));
            }
            Err(error) => {
                span.record("outcome", "failed");
                span.in_scope(|| warn!(error, "message publish failed"));
            }
        }
    }
}
