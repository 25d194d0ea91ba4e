//! Client-side publish path: batches messages by size, count and age, keeps
//! per-ordering-key sequencing, and settles every message exactly once.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod batch;
mod error;
mod flow_control;
mod handle;
mod lane;
mod ordered;
mod publisher;
mod queue;
mod settings;
mod trace;

pub use error::{DispatchError, Error};
pub use handle::PublishHandle;
pub use publisher::Publisher;
pub use settings::{
    BatchingOptions, BatchingSettings, FlowControlSettings, LimitExceededBehavior,
    MAX_BATCH_BYTES_CEILING, MAX_BATCH_MESSAGES_CEILING, OrderingKeyPolicy, PublisherOptions,
    PublisherSettings,
};
pub use trace::{SpanTracer, TRACE_CONTEXT_ATTRIBUTE};
