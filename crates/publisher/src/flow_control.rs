use crate::Error;
use crate::settings::{FlowControlSettings, LimitExceededBehavior};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Outstanding {
    bytes: usize,
    messages: usize,
}

/// Tracks messages and bytes accepted but not yet settled.
#[derive(Debug, Default)]
pub(crate) struct FlowController {
    outstanding: Mutex<Outstanding>,
}

impl FlowController {
    /// Reserves room for one message of `size` bytes. The reservation lasts
    /// until the returned permit is dropped. Both limits are checked and
    /// reserved together, so a refused message reserves nothing.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        size: usize,
        settings: &FlowControlSettings,
    ) -> Result<FlowPermit, Error> {
        let mut outstanding = self.outstanding.lock();

        if settings.limit_exceeded_behavior == LimitExceededBehavior::Error {
            if let Some(limit) = settings
                .max_outstanding_messages
                .filter(|limit| outstanding.messages + 1 > *limit)
            {
                debug!(limit, outstanding = outstanding.messages, "message limit reached");
                return Err(Error::FlowControl {
                    limit,
                    unit: "messages",
                });
            }
            if let Some(limit) = settings
                .max_outstanding_bytes
                .filter(|limit| outstanding.bytes + size > *limit)
            {
                debug!(limit, outstanding = outstanding.bytes, "byte limit reached");
                return Err(Error::FlowControl {
                    limit,
                    unit: "bytes",
                });
            }
        }

        outstanding.messages += 1;
        outstanding.bytes += size;

        Ok(FlowPermit {
            controller: self.clone(),
            size,
        })
    }

    pub(crate) fn outstanding_bytes(&self) -> usize {
        self.outstanding.lock().bytes
    }

    pub(crate) fn outstanding_messages(&self) -> usize {
        self.outstanding.lock().messages
    }
}

/// Outstanding-work reservation for one message, released on drop.
#[derive(Debug)]
pub(crate) struct FlowPermit {
    controller: Arc<FlowController>,
    size: usize,
}

impl Drop for FlowPermit {
    fn drop(&mut self) {
        let mut outstanding = self.controller.outstanding.lock();
        outstanding.messages -= 1;
        outstanding.bytes -= self.size;
    }
}
