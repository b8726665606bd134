// ABOUTME: Message cache bridge: the put/get contract sessions use to publish messages and receipts
// ABOUTME: Ships a bounded in-memory implementation that evicts the oldest record first

use crate::concatenation::ConcatenationType;
use crate::receipt::DeliveryReceipt;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Received from the peer
    Inbound,
    /// Sent by this simulator
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        })
    }
}

/// One cached message, outbound part or reassembled inbound message.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRecord {
    pub message_id: String,
    pub connection_id: String,
    pub direction: Direction,
    pub source: String,
    pub destination: String,
    pub text: String,
    /// Encoding the text was sent or detected in
    pub encoding: String,
    /// Encoding named by data_coding or configuration
    pub declared_encoding: String,
    pub encoding_corrected: bool,
    pub confidence: f64,
    pub concatenation: Option<ConcatenationType>,
    pub part_number: Option<u8>,
    pub total_parts: u8,
    pub reference: Option<u16>,
    pub message_time: DateTime<Utc>,
    /// Latest receipt stat, e.g. DELIVRD
    pub status: Option<String>,
    pub receipt_text: Option<String>,
    pub receipt_time: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn new(
        message_id: impl Into<String>,
        connection_id: impl Into<String>,
        direction: Direction,
        source: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            connection_id: connection_id.into(),
            direction,
            source: source.into(),
            destination: destination.into(),
            text: text.into(),
            encoding: String::new(),
            declared_encoding: String::new(),
            encoding_corrected: false,
            confidence: 1.0,
            concatenation: None,
            part_number: None,
            total_parts: 1,
            reference: None,
            message_time: Utc::now(),
            status: None,
            receipt_text: None,
            receipt_time: None,
        }
    }
}

/// Where decoded messages and receipt correlations go. Storage and
/// eviction are up to the implementation.
///
/// Records are keyed by message id and direction: an SMSC and an ESME in
/// the same process see the same id for one message, once each way.
pub trait MessageCache: Send + Sync {
    fn put(&self, record: MessageRecord);

    /// The outbound record for `message_id`, else the inbound one.
    fn get(&self, message_id: &str) -> Option<MessageRecord>;

    fn get_directed(&self, message_id: &str, direction: Direction) -> Option<MessageRecord>;

    /// Attach a receipt to the message it refers to, preferring the
    /// outbound record. Returns false when the message is unknown.
    fn record_receipt(&self, receipt: &DeliveryReceipt) -> bool;

    /// Remove both directions of `message_id`.
    fn remove(&self, message_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type RecordKey = (Direction, String);

#[derive(Debug, Default)]
struct Records {
    by_key: HashMap<RecordKey, MessageRecord>,
    order: VecDeque<RecordKey>,
}

impl Records {
    fn lookup_mut(&mut self, message_id: &str) -> Option<&mut MessageRecord> {
        let outbound = (Direction::Outbound, message_id.to_string());
        if self.by_key.contains_key(&outbound) {
            return self.by_key.get_mut(&outbound);
        }
        self.by_key.get_mut(&(Direction::Inbound, message_id.to_string()))
    }
}

/// Bounded in-memory cache.
#[derive(Debug)]
pub struct InMemoryMessageCache {
    records: RwLock<Records>,
    capacity: usize,
}

impl Default for InMemoryMessageCache {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl InMemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            capacity: capacity.max(1),
        }
    }

    /// Records whose text contains `needle`, oldest first.
    pub fn search_text(&self, needle: &str) -> Vec<MessageRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .order
            .iter()
            .filter_map(|key| records.by_key.get(key))
            .filter(|record| record.text.contains(needle))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<MessageRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .order
            .iter()
            .filter_map(|key| records.by_key.get(key))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.by_key.clear();
        records.order.clear();
    }
}

impl MessageCache for InMemoryMessageCache {
    fn put(&self, record: MessageRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let key = (record.direction, record.message_id.clone());
        if records.by_key.insert(key.clone(), record).is_none() {
            records.order.push_back(key);
        }
        while records.by_key.len() > self.capacity {
            let Some(oldest) = records.order.pop_front() else {
                break;
            };
            records.by_key.remove(&oldest);
            debug!(message_id = %oldest.1, direction = %oldest.0, "cache full, evicted oldest record");
        }
    }

    fn get(&self, message_id: &str) -> Option<MessageRecord> {
        self.get_directed(message_id, Direction::Outbound)
            .or_else(|| self.get_directed(message_id, Direction::Inbound))
    }

    fn get_directed(&self, message_id: &str, direction: Direction) -> Option<MessageRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .by_key
            .get(&(direction, message_id.to_string()))
            .cloned()
    }

    fn record_receipt(&self, receipt: &DeliveryReceipt) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.lookup_mut(&receipt.message_id) {
            Some(record) => {
                record.status = Some(receipt.stat.clone());
                record.receipt_text = Some(receipt.to_string());
                record.receipt_time = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    fn remove(&self, message_id: &str) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.by_key.len();
        records.by_key.retain(|(_, id), _| id != message_id);
        let removed = records.by_key.len() != before;
        if removed {
            records.order.retain(|(_, id)| id != message_id);
        }
        removed
    }

    fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::MessageState;

    fn record(id: &str, text: &str) -> MessageRecord {
        MessageRecord::new(id, "conn", Direction::Outbound, "1000", "2000", text)
    }

    #[test]
    fn put_get_remove() {
        let cache = InMemoryMessageCache::new();
        assert!(cache.is_empty());
        cache.put(record("1", "hello"));
        assert_eq!(cache.get("1").unwrap().text, "hello");
        assert!(cache.get("2").is_none());

        cache.put(record("1", "replaced"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("1").unwrap().text, "replaced");

        assert!(cache.remove("1"));
        assert!(!cache.remove("1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_record_is_evicted() {
        let cache = InMemoryMessageCache::with_capacity(2);
        cache.put(record("a", "1"));
        cache.put(record("b", "2"));
        cache.put(record("c", "3"));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.all().iter().map(|r| r.message_id.as_str()).collect::<Vec<_>>(),
            ["b", "c"]
        );
    }

    #[test]
    fn receipts_update_known_records() {
        let cache = InMemoryMessageCache::new();
        cache.put(record("000007", "hi"));

        let receipt = DeliveryReceipt::new("000007", MessageState::Delivered, Utc::now(), "hi");
        assert!(cache.record_receipt(&receipt));
        let updated = cache.get("000007").unwrap();
        assert_eq!(updated.status.as_deref(), Some("DELIVRD"));
        assert!(updated.receipt_text.unwrap().starts_with("id:000007"));

        let unknown = DeliveryReceipt::new("nope", MessageState::Delivered, Utc::now(), "");
        assert!(!cache.record_receipt(&unknown));
    }

    #[test]
    fn directions_are_kept_apart() {
        let cache = InMemoryMessageCache::new();
        let mut inbound = record("000003", "whole message");
        inbound.direction = Direction::Inbound;
        cache.put(inbound);
        cache.put(record("000003", "last part"));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.get("000003").unwrap().text, "last part");
        assert_eq!(
            cache.get_directed("000003", Direction::Inbound).unwrap().text,
            "whole message"
        );

        let receipt = DeliveryReceipt::new("000003", MessageState::Delivered, Utc::now(), "");
        assert!(cache.record_receipt(&receipt));
        assert!(cache.get_directed("000003", Direction::Inbound).unwrap().status.is_none());
        assert!(cache.get("000003").unwrap().status.is_some());

        assert!(cache.remove("000003"));
        assert!(cache.is_empty());
    }

    #[test]
    fn search_by_text() {
        let cache = InMemoryMessageCache::new();
        cache.put(record("1", "alpha beta"));
        cache.put(record("2", "gamma"));
        assert_eq!(cache.search_text("beta").len(), 1);
        assert!(cache.search_text("delta").is_empty());
    }
}
