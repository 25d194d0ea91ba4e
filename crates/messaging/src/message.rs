use std::collections::HashMap;

use bytes::Bytes;

/// Broker-assigned identifier for a published message.
pub type MessageId = String;

/// An outgoing message: opaque payload, string attributes and an optional
/// ordering key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    attributes: HashMap<String, String>,
    data: Bytes,
    ordering_key: Option<String>,
}

impl Message {
    /// Creates a message carrying `data` with no attributes and no ordering key.
    pub fn new<D>(data: D) -> Self
    where
        D: Into<Bytes>,
    {
        Self {
            attributes: HashMap::new(),
            data: data.into(),
            ordering_key: None,
        }
    }

    /// Adds (or replaces) a single attribute.
    #[must_use]
    pub fn with_attribute<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds every attribute yielded by `attributes`.
    #[must_use]
    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes.extend(
            attributes
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        self
    }

    /// Sets the ordering key.
    #[must_use]
    pub fn with_ordering_key<K>(mut self, ordering_key: K) -> Self
    where
        K: Into<String>,
    {
        self.ordering_key = Some(ordering_key.into());
        self
    }

    /// The attribute map.
    #[must_use]
    pub const fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// The payload.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// The ordering key, if any.
    #[must_use]
    pub fn ordering_key(&self) -> Option<&str> {
        self.ordering_key.as_deref()
    }

    /// Inserts an attribute, returning the value it replaced.
    pub fn insert_attribute<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes.insert(key.into(), value.into())
    }

    /// Removes and returns the ordering key.
    pub fn take_ordering_key(&mut self) -> Option<String> {
        self.ordering_key.take()
    }

    /// Byte size used for batch accounting: payload, attribute keys and
    /// values, and the ordering key.
    #[must_use]
    pub fn size(&self) -> usize {
        let attributes: usize = self
            .attributes
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum();

        self.data.len() + attributes + self.ordering_key.as_ref().map_or(0, String::len)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<String> for Message {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<&'static str> for Message {
    fn from(data: &'static str) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_counts_payload_attributes_and_key() {
        let message = Message::new("hello")
            .with_attribute("a", "bc")
            .with_attribute("def", "")
            .with_ordering_key("key");

        assert_eq!(message.size(), 5 + 3 + 3 + 3);
    }

    #[test]
    fn test_insert_attribute_returns_previous() {
        let mut message = Message::new("x").with_attribute("k", "old");

        assert_eq!(message.insert_attribute("k", "new"), Some("old".to_string()));
        assert_eq!(message.attributes().get("k").map(String::as_str), Some("new"));
    }

    #[test]
    fn test_take_ordering_key() {
        let mut message = Message::new("x").with_ordering_key("key");

        assert_eq!(message.take_ordering_key().as_deref(), Some("key"));
        assert_eq!(message.ordering_key(), None);
        assert_eq!(message.size(), 1);
    }
}
