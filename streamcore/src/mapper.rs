//! Conversion between domain [`Event`]s and transport [`Message`]s.
//!
//! The mapping is stateless and lossless for valid events:
//!
//! | event      | message                        |
//! |------------|--------------------------------|
//! | `subject`  | `subject`                      |
//! | `id`       | [`MSG_ID_HEADER`] header       |
//! | `metadata` | remaining headers              |
//! | `data`     | `payload`                      |

use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying the broker dedup id of a message.
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// A message as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Routing subject
    pub subject: String,
    /// Header bag, including the dedup id
    pub headers: HashMap<String, String>,
    /// Opaque body
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message without headers.
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            headers: HashMap::new(),
            payload: payload.into(),
        }
    }

    /// The dedup id header, if present.
    pub fn msg_id(&self) -> Option<&str> {
        self.headers.get(MSG_ID_HEADER).map(String::as_str)
    }

    /// Size used for storage accounting: subject, headers and payload.
    pub fn size(&self) -> usize {
        self.subject.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
            + self.payload.len()
    }
}

/// Maps an event to the message that is published for it.
pub fn to_message(event: &Event) -> Message {
    let mut headers = event.metadata.clone();
    headers.insert(MSG_ID_HEADER.to_string(), event.id.clone());

    Message {
        subject: event.subject.clone(),
        headers,
        payload: event.data.clone(),
    }
}

/// Rebuilds the event carried by a message.
///
/// A message without the dedup header yields an event with an empty id, which
/// then fails [`Event::validate`].
pub fn from_message(message: Message) -> Event {
    let Message {
        subject,
        mut headers,
        payload,
    } = message;
    let id = headers.remove(MSG_ID_HEADER).unwrap_or_default();

    Event {
        subject,
        id,
        data: payload,
        metadata: headers,
    }
}
