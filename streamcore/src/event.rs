//! The domain event carried by streams.

use crate::errors::EventValidationError;
use crate::mapper::MSG_ID_HEADER;
use crate::validation::is_concrete_subject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key of the distributed trace context.
pub const TRACE_CONTEXT_KEY: &str = "traceparent";

/// A domain event published to, and consumed from, a stream.
///
/// Events are plain values: they can be built in an invalid state (for
/// example from untrusted input) and are checked with [`Event::validate`]
/// before anything is sent to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hierarchical routing key, e.g. `shop.eu.prod.orders.created`
    pub subject: String,
    /// Unique id, used by the broker to discard republished copies
    pub id: String,
    /// Opaque payload
    pub data: Vec<u8>,
    /// Cross-cutting context such as trace headers
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Creates an event with a fresh UUIDv7 id and no metadata.
    pub fn new(subject: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            id: Uuid::now_v7().to_string(),
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the trace context carried in metadata, if any.
    pub fn trace_context(&self) -> Option<&str> {
        self.metadata.get(TRACE_CONTEXT_KEY).map(String::as_str)
    }

    /// Checks that the event can be published.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.subject.is_empty() {
            return Err(EventValidationError::EmptySubject);
        }
        if !is_concrete_subject(&self.subject) {
            return Err(EventValidationError::InvalidSubject(self.subject.clone()));
        }
        if self.id.is_empty() {
            return Err(EventValidationError::EmptyId);
        }
        if self.data.is_empty() {
            return Err(EventValidationError::EmptyData);
        }
        if self.metadata.contains_key(MSG_ID_HEADER) {
            return Err(EventValidationError::ReservedMetadataKey(
                MSG_ID_HEADER.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_event() -> Event {
        Event::new("shop.eu.prod.orders.created", b"{\"id\":1}".to_vec())
    }

    #[test]
    fn new_event_is_valid_with_generated_id() {
        let event = valid_event();
        assert!(event.validate().is_ok());
        assert!(Uuid::parse_str(&event.id).is_ok());
    }

    #[test]
    fn empty_subject_is_rejected() {
        let mut event = valid_event();
        event.subject = String::new();
        assert_eq!(event.validate(), Err(EventValidationError::EmptySubject));
    }

    #[test]
    fn malformed_subject_is_rejected() {
        for subject in ["orders created", "orders.", "orders.*", "orders-created"] {
            let mut event = valid_event();
            event.subject = subject.to_string();
            assert_eq!(
                event.validate(),
                Err(EventValidationError::InvalidSubject(subject.to_string()))
            );
        }
    }

    #[test]
    fn empty_id_is_rejected() {
        let event = valid_event().with_id("");
        assert_eq!(event.validate(), Err(EventValidationError::EmptyId));
    }

    #[test]
    fn empty_data_is_rejected() {
        let event = Event::new("orders", Vec::new());
        assert_eq!(event.validate(), Err(EventValidationError::EmptyData));
    }

    #[test]
    fn dedup_header_is_reserved_in_metadata() {
        let event = valid_event()
            .with_id("evt-1")
            .with_metadata(MSG_ID_HEADER, "caller-value");
        assert_eq!(
            event.validate(),
            Err(EventValidationError::ReservedMetadataKey(
                MSG_ID_HEADER.to_string()
            ))
        );
    }

    #[test]
    fn trace_context_is_read_from_metadata() {
        let event = valid_event().with_metadata(
            TRACE_CONTEXT_KEY,
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        );
        assert_eq!(
            event.trace_context(),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
    }
}
