//! Durable pull consumer bookkeeping.
//!
//! A consumer walks its stream with a cursor. Every delivery is pending until
//! it is settled or its ack deadline passes; nak'd and expired deliveries go
//! to a redelivery queue that is served before new messages. A message is
//! delivered at most `max_deliver` times (unbounded when `max_deliver <= 0`).

use crate::log::{lookup, StoredMessage};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use streamcore::{subject_matches, AckPolicy, ConsumerConfig, DeliverPolicy, Message};
use tokio::time::Instant;

/// A message picked for delivery.
#[derive(Debug, Clone)]
pub(crate) struct Picked {
    pub(crate) sequence: u64,
    pub(crate) delivered: u64,
    pub(crate) message: Message,
}

pub(crate) struct ConsumerState {
    pub(crate) config: ConsumerConfig,
    cursor: u64,
    // sequence -> ack deadline
    pending: BTreeMap<u64, Instant>,
    // sequence -> earliest redelivery
    redeliver: BTreeMap<u64, Instant>,
    delivered: HashMap<u64, u64>,
    pub(crate) acked: BTreeSet<u64>,
    pub(crate) terminated: BTreeSet<u64>,
}

impl ConsumerState {
    pub(crate) fn new(config: ConsumerConfig, last_sequence: u64) -> Self {
        let cursor = match config.deliver_policy {
            DeliverPolicy::All => 0,
            DeliverPolicy::New => last_sequence,
        };
        Self {
            config,
            cursor,
            pending: BTreeMap::new(),
            redeliver: BTreeMap::new(),
            delivered: HashMap::new(),
            acked: BTreeSet::new(),
            terminated: BTreeSet::new(),
        }
    }

    pub(crate) fn delivery_count(&self, sequence: u64) -> u64 {
        self.delivered.get(&sequence).copied().unwrap_or(0)
    }

    fn exhausted(&self, sequence: u64) -> bool {
        u64::try_from(self.config.max_deliver)
            .ok()
            .filter(|max| *max > 0)
            .is_some_and(|max| self.delivery_count(sequence) >= max)
    }

    /// Picks up to `batch` deliveries, redeliveries first.
    pub(crate) fn next_batch(
        &mut self,
        log: &VecDeque<StoredMessage>,
        batch: usize,
        now: Instant,
    ) -> Vec<Picked> {
        self.expire_pending(now);

        let mut picked = Vec::new();

        let ready: Vec<u64> = self
            .redeliver
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in ready {
            if picked.len() >= batch {
                break;
            }
            self.redeliver.remove(&sequence);
            if self.exhausted(sequence) {
                continue;
            }
            // Discarded by a stream limit.
            let Some(stored) = lookup(log, sequence) else {
                continue;
            };
            picked.push(self.deliver(stored, now));
        }

        let start = self.cursor;
        for stored in log.iter().skip_while(|stored| stored.sequence <= start) {
            if picked.len() >= batch {
                break;
            }
            self.cursor = stored.sequence;
            if subject_matches(&self.config.filter_subject, &stored.message.subject) {
                picked.push(self.deliver(stored, now));
            }
        }

        picked
    }

    /// Earliest instant at which a pending or nak'd delivery becomes
    /// deliverable again.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.pending
            .values()
            .chain(self.redeliver.values())
            .min()
            .copied()
    }

    pub(crate) fn ack(&mut self, sequence: u64) {
        self.pending.remove(&sequence);
        self.redeliver.remove(&sequence);
        self.acked.insert(sequence);
    }

    pub(crate) fn nak(&mut self, sequence: u64, delay: Option<Duration>, now: Instant) {
        if self.pending.remove(&sequence).is_none() || self.exhausted(sequence) {
            return;
        }
        self.redeliver
            .insert(sequence, now + delay.unwrap_or_default());
    }

    pub(crate) fn term(&mut self, sequence: u64) {
        self.pending.remove(&sequence);
        self.redeliver.remove(&sequence);
        self.terminated.insert(sequence);
    }

    fn expire_pending(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in expired {
            self.pending.remove(&sequence);
            if !self.exhausted(sequence) {
                self.redeliver.insert(sequence, now);
            }
        }
    }

    fn deliver(&mut self, stored: &StoredMessage, now: Instant) -> Picked {
        let delivered = self.delivered.entry(stored.sequence).or_insert(0);
        *delivered += 1;
        let delivered = *delivered;

        match self.config.ack_policy {
            AckPolicy::Explicit => {
                self.pending
                    .insert(stored.sequence, now + self.config.ack_wait);
            }
            AckPolicy::None => {
                self.acked.insert(stored.sequence);
            }
        }

        Picked {
            sequence: stored.sequence,
            delivered,
            message: stored.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTER: &str = "streamcore.local.default.orders.>";

    fn config(max_deliver: i64) -> ConsumerConfig {
        ConsumerConfig {
            durable_name: "billing".to_string(),
            filter_subject: FILTER.to_string(),
            max_deliver,
            ack_wait: Duration::from_secs(30),
            max_request_batch: 10,
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
        }
    }

    fn log(subjects: &[&str], now: Instant) -> VecDeque<StoredMessage> {
        subjects
            .iter()
            .zip(1..)
            .map(|(subject, sequence)| StoredMessage {
                sequence,
                message: Message::new(*subject, b"x".to_vec()),
                stored_at: now,
            })
            .collect()
    }

    fn sequences(picked: &[Picked]) -> Vec<u64> {
        picked.iter().map(|p| p.sequence).collect()
    }

    #[test]
    fn delivers_only_matching_subjects_in_order() {
        let now = Instant::now();
        let log = log(
            &[
                "streamcore.local.default.orders.created",
                "streamcore.local.default.payments.created",
                "streamcore.local.default.orders.shipped",
            ],
            now,
        );
        let mut consumer = ConsumerState::new(config(4), 0);

        let picked = consumer.next_batch(&log, 10, now);

        assert_eq!(sequences(&picked), vec![1, 3]);
        assert!(picked.iter().all(|p| p.delivered == 1));
        assert!(consumer.next_batch(&log, 10, now).is_empty());
    }

    #[test]
    fn batch_size_bounds_each_fetch() {
        let now = Instant::now();
        let log = log(
            &[
                "streamcore.local.default.orders.a",
                "streamcore.local.default.orders.b",
                "streamcore.local.default.orders.c",
            ],
            now,
        );
        let mut consumer = ConsumerState::new(config(4), 0);

        assert_eq!(sequences(&consumer.next_batch(&log, 2, now)), vec![1, 2]);
        assert_eq!(sequences(&consumer.next_batch(&log, 2, now)), vec![3]);
    }

    #[test]
    fn deliver_new_skips_existing_messages() {
        let now = Instant::now();
        let log = log(&["streamcore.local.default.orders.a"], now);
        let mut consumer = ConsumerState::new(
            ConsumerConfig {
                deliver_policy: DeliverPolicy::New,
                ..config(4)
            },
            1,
        );

        assert!(consumer.next_batch(&log, 10, now).is_empty());
    }

    #[test]
    fn nak_redelivers_until_max_deliver() {
        let now = Instant::now();
        let log = log(&["streamcore.local.default.orders.a"], now);
        let mut consumer = ConsumerState::new(config(3), 0);

        for attempt in 1..=3 {
            let picked = consumer.next_batch(&log, 10, now);
            assert_eq!(sequences(&picked), vec![1]);
            assert_eq!(picked[0].delivered, attempt);
            consumer.nak(1, None, now);
        }

        assert!(consumer.next_batch(&log, 10, now).is_empty());
        assert_eq!(consumer.delivery_count(1), 3);
        assert_eq!(consumer.next_wake(), None);
    }

    #[test]
    fn nak_delay_postpones_redelivery() {
        let now = Instant::now();
        let log = log(&["streamcore.local.default.orders.a"], now);
        let mut consumer = ConsumerState::new(config(3), 0);

        consumer.next_batch(&log, 10, now);
        consumer.nak(1, Some(Duration::from_secs(5)), now);

        assert!(consumer.next_batch(&log, 10, now).is_empty());
        assert_eq!(consumer.next_wake(), Some(now + Duration::from_secs(5)));
        let later = now + Duration::from_secs(5);
        assert_eq!(sequences(&consumer.next_batch(&log, 10, later)), vec![1]);
    }

    #[test]
    fn unsettled_deliveries_are_redelivered_after_ack_wait() {
        let now = Instant::now();
        let log = log(&["streamcore.local.default.orders.a"], now);
        let mut consumer = ConsumerState::new(config(3), 0);

        consumer.next_batch(&log, 10, now);
        assert!(consumer.next_batch(&log, 10, now).is_empty());

        let later = now + Duration::from_secs(30);
        let picked = consumer.next_batch(&log, 10, later);
        assert_eq!(sequences(&picked), vec![1]);
        assert_eq!(picked[0].delivered, 2);
    }

    #[test]
    fn acked_and_terminated_messages_are_never_redelivered() {
        let now = Instant::now();
        let log = log(
            &[
                "streamcore.local.default.orders.a",
                "streamcore.local.default.orders.b",
            ],
            now,
        );
        let mut consumer = ConsumerState::new(config(3), 0);

        consumer.next_batch(&log, 10, now);
        consumer.ack(1);
        consumer.term(2);
        consumer.nak(1, None, now);
        consumer.nak(2, None, now);

        let later = now + Duration::from_secs(60);
        assert!(consumer.next_batch(&log, 10, later).is_empty());
        assert!(consumer.acked.contains(&1));
        assert!(consumer.terminated.contains(&2));
    }

    #[test]
    fn non_positive_max_deliver_is_unbounded() {
        let now = Instant::now();
        let log = log(&["streamcore.local.default.orders.a"], now);
        let mut consumer = ConsumerState::new(config(-1), 0);

        for _ in 0..10 {
            assert_eq!(sequences(&consumer.next_batch(&log, 10, now)), vec![1]);
            consumer.nak(1, None, now);
        }
    }

    #[test]
    fn discarded_messages_are_dropped_from_redelivery() {
        let now = Instant::now();
        let mut log = log(
            &[
                "streamcore.local.default.orders.a",
                "streamcore.local.default.orders.b",
            ],
            now,
        );
        let mut consumer = ConsumerState::new(config(3), 0);

        consumer.next_batch(&log, 10, now);
        consumer.nak(1, None, now);
        consumer.ack(2);
        log.pop_front();

        assert!(consumer.next_batch(&log, 10, now).is_empty());
        assert_eq!(consumer.next_wake(), None);
    }
}
