//! Per-queue message container.
//!
//! A composite index that must stay coherent: primary id map, arrival-order
//! map, a time-ordered set keyed by each message's next self-transition
//! (visible_at while pending, visibility deadline while inflight), and the
//! receipt-handle map for the inflight subset. All mutations happen under the
//! owning queue's exclusive access.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::message::{Message, MessageState};
use crate::types::QueueStats;

#[derive(Debug, Default)]
pub struct MessageStore {
    by_id: HashMap<String, Message>,
    by_order: BTreeMap<u64, String>,
    by_time: BTreeSet<(u64, u64)>,
    by_receipt: HashMap<String, String>,
    visible: usize,
    inflight: usize,
    delayed: usize,
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            visible: self.visible,
            inflight: self.inflight,
            delayed: self.delayed,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id)
    }

    pub fn insert(&mut self, mut msg: Message, now: u64) {
        debug_assert!(!self.by_id.contains_key(&msg.id));
        debug_assert!(!self.by_order.contains_key(&msg.order_index));

        match &msg.state {
            MessageState::Pending { visible_at } => {
                msg.counted_delayed = *visible_at > now;
                if msg.counted_delayed {
                    self.delayed += 1;
                } else {
                    self.visible += 1;
                }
            }
            MessageState::Inflight { receipt_handle, .. } => {
                self.inflight += 1;
                self.by_receipt.insert(receipt_handle.clone(), msg.id.clone());
            }
        }

        self.by_order.insert(msg.order_index, msg.id.clone());
        self.by_time.insert((msg.state.index_time(), msg.order_index));
        self.by_id.insert(msg.id.clone(), msg);
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let msg = self.by_id.remove(id)?;
        self.by_order.remove(&msg.order_index);
        self.by_time.remove(&(msg.state.index_time(), msg.order_index));
        match &msg.state {
            MessageState::Pending { .. } => {
                if msg.counted_delayed {
                    self.delayed -= 1;
                } else {
                    self.visible -= 1;
                }
            }
            MessageState::Inflight { receipt_handle, .. } => {
                self.inflight -= 1;
                self.by_receipt.remove(receipt_handle);
            }
        }
        Some(msg)
    }

    pub fn receipt_message_id(&self, receipt_handle: &str) -> Option<&str> {
        self.by_receipt.get(receipt_handle).map(String::as_str)
    }

    /// Pending → Inflight. The caller guarantees the message exists and is
    /// pending and visible.
    pub fn mark_inflight(&mut self, id: &str, receipt_handle: String, deadline: u64) {
        let Some(msg) = self.by_id.get_mut(id) else { return };
        let old_key = (msg.state.index_time(), msg.order_index);
        debug_assert!(matches!(msg.state, MessageState::Pending { .. }));

        if msg.counted_delayed {
            self.delayed -= 1;
            msg.counted_delayed = false;
        } else {
            self.visible -= 1;
        }
        self.inflight += 1;

        msg.state = MessageState::Inflight {
            receipt_handle: receipt_handle.clone(),
            deadline,
        };
        self.by_time.remove(&old_key);
        self.by_time.insert((deadline, msg.order_index));
        self.by_receipt.insert(receipt_handle, id.to_string());
    }

    /// Inflight → Pending, invalidating the receipt handle. Returns the
    /// message's group id so the caller can release its group lock.
    pub fn release(&mut self, id: &str, visible_at: u64, now: u64) -> Option<String> {
        let msg = self.by_id.get_mut(id)?;
        let old_key = (msg.state.index_time(), msg.order_index);
        let MessageState::Inflight { receipt_handle, .. } = &msg.state else {
            return None;
        };
        self.by_receipt.remove(receipt_handle);
        self.inflight -= 1;

        msg.counted_delayed = visible_at > now;
        if msg.counted_delayed {
            self.delayed += 1;
        } else {
            self.visible += 1;
        }
        msg.state = MessageState::Pending { visible_at };
        self.by_time.remove(&old_key);
        self.by_time.insert((visible_at, msg.order_index));
        msg.group_id.clone()
    }

    /// Move an inflight message's visibility deadline.
    pub fn extend_deadline(&mut self, id: &str, new_deadline: u64) {
        let Some(msg) = self.by_id.get_mut(id) else { return };
        let old_key = (msg.state.index_time(), msg.order_index);
        let MessageState::Inflight { receipt_handle, .. } = &msg.state else {
            return;
        };
        msg.state = MessageState::Inflight {
            receipt_handle: receipt_handle.clone(),
            deadline: new_deadline,
        };
        self.by_time.remove(&old_key);
        self.by_time.insert((new_deadline, msg.order_index));
    }

    /// A pending message whose visible_at has passed stops counting as
    /// delayed. No index keys move.
    pub fn note_visible(&mut self, id: &str) {
        if let Some(msg) = self.by_id.get_mut(id) {
            if msg.counted_delayed {
                msg.counted_delayed = false;
                self.delayed -= 1;
                self.visible += 1;
            }
        }
    }

    /// Record a delivery on an inflight message.
    pub fn record_delivery(&mut self, id: &str, now: u64) {
        if let Some(msg) = self.by_id.get_mut(id) {
            msg.receive_count += 1;
            if msg.first_received_at.is_none() {
                msg.first_received_at = Some(now);
            }
        }
    }

    /// Earliest next self-transition time across all messages.
    pub fn next_index_time(&self) -> Option<u64> {
        self.by_time.iter().next().map(|(t, _)| *t)
    }

    /// Earliest self-transition strictly in the future. Entries at or before
    /// `now` have already transitioned (or will on the next tick) and carry
    /// no future event.
    pub fn next_index_time_after(&self, now: u64) -> Option<u64> {
        self.by_time
            .range((now + 1, 0)..)
            .next()
            .map(|(t, _)| *t)
    }

    /// Sent time of the oldest stored message (order index is monotone with
    /// arrival), for the retention sweep.
    pub fn oldest_sent_at(&self) -> Option<u64> {
        self.by_order
            .values()
            .next()
            .and_then(|id| self.by_id.get(id))
            .map(|m| m.sent_at)
    }

    /// Order indexes of messages whose index time has passed, ascending by
    /// time. These are due for a tick transition (delayed → visible or
    /// inflight → pending).
    pub fn due_order_indexes(&self, now: u64) -> Vec<u64> {
        self.by_time
            .range(..=(now, u64::MAX))
            .map(|(_, order)| *order)
            .collect()
    }

    pub fn id_for_order(&self, order_index: u64) -> Option<&str> {
        self.by_order.get(&order_index).map(String::as_str)
    }

    /// Arrival-order iteration over ids, for the FIFO selection scan and the
    /// retention sweep (order index is monotone with sent_at).
    pub fn iter_order(&self) -> impl Iterator<Item = (&u64, &String)> {
        self.by_order.iter()
    }

    /// Time-order iteration over (index_time, order_index), for the standard
    /// selection scan (approximately oldest-visible-first).
    pub fn iter_time(&self) -> impl Iterator<Item = &(u64, u64)> {
        self.by_time.iter()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_order.clear();
        self.by_time.clear();
        self.by_receipt.clear();
        self.visible = 0;
        self.inflight = 0;
        self.delayed = 0;
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert_eq!(self.by_id.len(), self.by_order.len());
        assert_eq!(self.by_id.len(), self.by_time.len());
        assert_eq!(self.by_id.len(), self.visible + self.inflight + self.delayed);
        for (handle, id) in &self.by_receipt {
            let msg = self.by_id.get(id).expect("receipt points at stored message");
            match &msg.state {
                MessageState::Inflight { receipt_handle, .. } => {
                    assert_eq!(receipt_handle, handle)
                }
                _ => panic!("receipt handle maps to non-inflight message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::md5_hex;
    use std::collections::HashMap;

    fn msg(id: &str, order: u64, visible_at: u64) -> Message {
        Message {
            id: id.to_string(),
            body: "b".into(),
            md5_of_body: md5_hex(b"b"),
            attributes: HashMap::new(),
            md5_of_attributes: None,
            sent_at: 0,
            first_received_at: None,
            receive_count: 0,
            state: MessageState::Pending { visible_at },
            order_index: order,
            group_id: None,
            dedup_id: None,
            counted_delayed: false,
        }
    }

    #[test]
    fn counters_track_transitions() {
        let mut store = MessageStore::new();
        store.insert(msg("a", 1, 0), 0);
        store.insert(msg("b", 2, 500), 0);
        assert_eq!(store.stats(), QueueStats { visible: 1, inflight: 0, delayed: 1 });
        store.check_invariants();

        store.mark_inflight("a", "r1".into(), 1_000);
        assert_eq!(store.stats(), QueueStats { visible: 0, inflight: 1, delayed: 1 });
        store.check_invariants();

        store.note_visible("b");
        assert_eq!(store.stats(), QueueStats { visible: 1, inflight: 1, delayed: 0 });

        store.release("a", 1_000, 1_000);
        assert_eq!(store.stats(), QueueStats { visible: 2, inflight: 0, delayed: 0 });
        store.check_invariants();
    }

    #[test]
    fn release_invalidates_receipt() {
        let mut store = MessageStore::new();
        store.insert(msg("a", 1, 0), 0);
        store.mark_inflight("a", "r1".into(), 1_000);
        assert_eq!(store.receipt_message_id("r1"), Some("a"));

        store.release("a", 1_000, 1_000);
        assert_eq!(store.receipt_message_id("r1"), None);
        store.check_invariants();
    }

    #[test]
    fn due_entries_respect_index_time() {
        let mut store = MessageStore::new();
        store.insert(msg("a", 1, 100), 0);
        store.insert(msg("b", 2, 300), 0);
        assert_eq!(store.due_order_indexes(100), vec![1]);
        assert_eq!(store.due_order_indexes(300), vec![1, 2]);
        assert_eq!(store.next_index_time(), Some(100));
    }

    #[test]
    fn extend_deadline_moves_index_key() {
        let mut store = MessageStore::new();
        store.insert(msg("a", 1, 0), 0);
        store.mark_inflight("a", "r1".into(), 1_000);
        store.extend_deadline("a", 5_000);
        assert_eq!(store.next_index_time(), Some(5_000));
        store.check_invariants();
    }

    #[test]
    fn remove_clears_every_index() {
        let mut store = MessageStore::new();
        store.insert(msg("a", 1, 0), 0);
        store.mark_inflight("a", "r1".into(), 1_000);
        let removed = store.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(store.is_empty());
        assert_eq!(store.receipt_message_id("r1"), None);
        assert_eq!(store.next_index_time(), None);
        store.check_invariants();
    }
}
