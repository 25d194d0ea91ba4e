//! Abstract interfaces for the client-side publish path.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Messages are the unit of publication.
pub mod message;

/// Tracers follow a message from enqueue to settlement.
pub mod tracer;

/// Transports deliver closed batches to the broker.
pub mod transport;

/// Validators check message shape before anything is queued.
pub mod validation;

pub use message::{Message, MessageId};
