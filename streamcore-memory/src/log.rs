//! Append-only message log of one stream.

use crate::consumer::ConsumerState;
use std::collections::{HashMap, VecDeque};
use streamcore::{subject_matches, Message, PublishAck, StreamDefinition, TransportError};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub(crate) sequence: u64,
    pub(crate) message: Message,
    pub(crate) stored_at: Instant,
}

/// Finds a stored message by sequence; sequences in a log are contiguous.
pub(crate) fn lookup(log: &VecDeque<StoredMessage>, sequence: u64) -> Option<&StoredMessage> {
    let first = log.front()?.sequence;
    let index = usize::try_from(sequence.checked_sub(first)?).ok()?;
    log.get(index)
}

pub(crate) struct StoredStream {
    pub(crate) definition: StreamDefinition,
    pub(crate) log: VecDeque<StoredMessage>,
    pub(crate) consumers: HashMap<String, ConsumerState>,
    last_sequence: u64,
    bytes: u64,
    dedup: HashMap<String, (u64, Instant)>,
}

impl StoredStream {
    pub(crate) fn new(definition: StreamDefinition) -> Self {
        Self {
            definition,
            log: VecDeque::new(),
            consumers: HashMap::new(),
            last_sequence: 0,
            bytes: 0,
            dedup: HashMap::new(),
        }
    }

    pub(crate) fn captures(&self, subject: &str) -> bool {
        self.definition
            .subjects
            .iter()
            .any(|filter| subject_matches(filter, subject))
    }

    pub(crate) const fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub(crate) const fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn first_sequence(&self) -> u64 {
        self.log
            .front()
            .map_or(self.last_sequence + 1, |stored| stored.sequence)
    }

    /// Stores `message`, or reports the earlier copy when its id was seen
    /// within the dedup window.
    pub(crate) fn append(
        &mut self,
        message: Message,
        now: Instant,
    ) -> Result<PublishAck, TransportError> {
        let size = message.size();
        if size > self.definition.limits.msg_size {
            return Err(TransportError::MessageTooLarge {
                size,
                limit: self.definition.limits.msg_size,
            });
        }

        self.expire(now);

        if let Some(msg_id) = message.msg_id() {
            if let Some((sequence, _)) = self.dedup.get(msg_id) {
                return Ok(self.ack(*sequence, true));
            }
        }

        self.last_sequence += 1;
        let sequence = self.last_sequence;
        if let Some(msg_id) = message.msg_id() {
            self.dedup.insert(msg_id.to_string(), (sequence, now));
        }
        self.bytes += size as u64;
        self.log.push_back(StoredMessage {
            sequence,
            message,
            stored_at: now,
        });
        self.enforce_limits();

        Ok(self.ack(sequence, false))
    }

    /// Drops messages older than `msg_age` and dedup entries older than the
    /// duplicate window.
    pub(crate) fn expire(&mut self, now: Instant) {
        let max_age = self.definition.limits.msg_age;
        while self
            .log
            .front()
            .is_some_and(|stored| now.duration_since(stored.stored_at) >= max_age)
        {
            self.discard_oldest();
        }

        let window = self.definition.duplicate_window;
        self.dedup
            .retain(|_, (_, stored_at)| now.duration_since(*stored_at) < window);
    }

    pub(crate) fn enforce_limits(&mut self) {
        let limits = self.definition.limits;
        while self.log.len() as u64 > limits.msg_count || self.bytes > limits.bytes {
            if !self.discard_oldest() {
                break;
            }
        }
    }

    fn discard_oldest(&mut self) -> bool {
        match self.log.pop_front() {
            Some(stored) => {
                self.bytes = self.bytes.saturating_sub(stored.message.size() as u64);
                true
            }
            None => false,
        }
    }

    fn ack(&self, sequence: u64, duplicate: bool) -> PublishAck {
        PublishAck {
            stream: self.definition.name.to_string(),
            sequence,
            duplicate,
        }
    }
}
