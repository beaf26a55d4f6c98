//! FIFO content deduplication cache.

use std::collections::HashMap;

use crate::types::SendResult;

/// Deduplication window, a hard five minutes.
pub const DEDUP_WINDOW_MILLIS: u64 = 5 * 60 * 1000;

#[derive(Debug)]
struct DedupEntry {
    result: SendResult,
    inserted_at: u64,
}

/// dedup_id → original send result, expiring five minutes after insertion.
/// Expiry is lazy on lookup and periodic on the queue tick.
#[derive(Debug, Default)]
pub struct DeduplicationIndex {
    entries: HashMap<String, DedupEntry>,
}

impl DeduplicationIndex {
    pub fn new() -> Self {
        DeduplicationIndex::default()
    }

    pub fn lookup(&self, dedup_id: &str, now: u64) -> Option<&SendResult> {
        self.entries
            .get(dedup_id)
            .filter(|e| now.saturating_sub(e.inserted_at) < DEDUP_WINDOW_MILLIS)
            .map(|e| &e.result)
    }

    pub fn insert(&mut self, dedup_id: String, result: SendResult, now: u64) {
        self.entries.insert(
            dedup_id,
            DedupEntry {
                result,
                inserted_at: now,
            },
        );
    }

    pub fn sweep(&mut self, now: u64) {
        self.entries
            .retain(|_, e| now.saturating_sub(e.inserted_at) < DEDUP_WINDOW_MILLIS);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str) -> SendResult {
        SendResult {
            message_id: id.to_string(),
            md5_of_body: "00".into(),
            md5_of_attributes: None,
            sequence_number: None,
        }
    }

    #[test]
    fn hit_within_window() {
        let mut index = DeduplicationIndex::new();
        index.insert("d1".into(), result("m1"), 0);
        let hit = index.lookup("d1", DEDUP_WINDOW_MILLIS - 1).unwrap();
        assert_eq!(hit.message_id, "m1");
    }

    #[test]
    fn miss_at_window_boundary() {
        let mut index = DeduplicationIndex::new();
        index.insert("d1".into(), result("m1"), 0);
        assert!(index.lookup("d1", DEDUP_WINDOW_MILLIS).is_none());
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let mut index = DeduplicationIndex::new();
        index.insert("old".into(), result("m1"), 0);
        index.insert("new".into(), result("m2"), DEDUP_WINDOW_MILLIS);
        index.sweep(DEDUP_WINDOW_MILLIS + 1);
        assert_eq!(index.len(), 1);
        assert!(index.lookup("new", DEDUP_WINDOW_MILLIS + 1).is_some());
    }

    #[test]
    fn reinsert_refreshes_window() {
        let mut index = DeduplicationIndex::new();
        index.insert("d1".into(), result("m1"), 0);
        index.insert("d1".into(), result("m2"), 100);
        let hit = index.lookup("d1", DEDUP_WINDOW_MILLIS + 50).unwrap();
        assert_eq!(hit.message_id, "m2");
    }
}
