use crate::message::Message;

use thiserror::Error;

/// Largest attribute key accepted by the broker.
pub const MAX_ATTRIBUTE_KEY_BYTES: usize = 256;

/// Largest attribute value accepted by the broker.
pub const MAX_ATTRIBUTE_VALUE_BYTES: usize = 1024;

/// Largest ordering key accepted by the broker.
pub const MAX_ORDERING_KEY_BYTES: usize = 1024;

/// Largest single message accepted by the broker.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1000 * 1000;

/// Reasons a message is rejected before it reaches a batch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// An attribute key was larger than the broker allows.
    #[error("attribute key `{key}` is {len} bytes, limit is {MAX_ATTRIBUTE_KEY_BYTES}")]
    AttributeKeyTooLarge {
        /// The offending key.
        key: String,
        /// Its length in bytes.
        len: usize,
    },

    /// An attribute value was larger than the broker allows.
    #[error("attribute `{key}` has a {len} byte value, limit is {MAX_ATTRIBUTE_VALUE_BYTES}")]
    AttributeValueTooLarge {
        /// The key whose value is too large.
        key: String,
        /// The value length in bytes.
        len: usize,
    },

    /// An attribute key was empty.
    #[error("attribute keys must not be empty")]
    EmptyAttributeKey,

    /// The message had neither data nor attributes.
    #[error("message must contain data or at least one attribute")]
    EmptyMessage,

    /// An ordering key was present but empty.
    #[error("ordering key must not be empty")]
    EmptyOrderingKey,

    /// The message was larger than the broker allows.
    #[error("message is {size} bytes, limit is {limit}")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// The limit it exceeded.
        limit: usize,
    },

    /// An ordering key was supplied while message ordering is disabled.
    #[error("ordering key `{0}` supplied but message ordering is not enabled")]
    OrderingDisabled(String),

    /// The ordering key was larger than the broker allows.
    #[error("ordering key is {0} bytes, limit is {MAX_ORDERING_KEY_BYTES}")]
    OrderingKeyTooLarge(usize),
}

/// Checks a message's shape synchronously.
pub trait Validator: Send + Sync + 'static {
    /// Returns an error if `message` must not be published.
    ///
    /// # Errors
    ///
    /// Returns the first rule the message breaks.
    fn validate(&self, message: &Message) -> Result<(), ValidationError>;
}

/// Applies the broker's published limits.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, message: &Message) -> Result<(), ValidationError> {
        if message.data().is_empty() && message.attributes().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        for (key, value) in message.attributes() {
            if key.is_empty() {
                return Err(ValidationError::EmptyAttributeKey);
            }
            if key.len() > MAX_ATTRIBUTE_KEY_BYTES {
                return Err(ValidationError::AttributeKeyTooLarge {
                    key: key.clone(),
                    len: key.len(),
                });
            }
            if value.len() > MAX_ATTRIBUTE_VALUE_BYTES {
                return Err(ValidationError::AttributeValueTooLarge {
                    key: key.clone(),
                    len: value.len(),
                });
            }
        }

        match message.ordering_key() {
            Some("") => return Err(ValidationError::EmptyOrderingKey),
            Some(key) if key.len() > MAX_ORDERING_KEY_BYTES => {
                return Err(ValidationError::OrderingKeyTooLarge(key.len()));
            }
            _ => {}
        }

        let size = message.size();
        if size > MAX_MESSAGE_BYTES {
            return Err(ValidationError::MessageTooLarge {
                size,
                limit: MAX_MESSAGE_BYTES,
            });
        }

        Ok(())
    }
}
