//! FIFO message-group locking.

use std::collections::HashMap;

/// Lock state for one message group: the first message that took the lock
/// plus a count of the group's inflight messages. The group stays locked
/// until every inflight message of the group is deleted or released.
#[derive(Debug, Clone)]
struct GroupLock {
    holder: String,
    inflight: u32,
}

#[derive(Debug, Default)]
pub struct GroupLockTable {
    locks: HashMap<String, GroupLock>,
}

impl GroupLockTable {
    pub fn new() -> Self {
        GroupLockTable::default()
    }

    pub fn is_locked(&self, group_id: &str) -> bool {
        self.locks.contains_key(group_id)
    }

    /// Lock the group for a message entering flight, or add the message to an
    /// existing lock taken in the same batch.
    pub fn acquire(&mut self, group_id: &str, message_id: &str) {
        self.locks
            .entry(group_id.to_string())
            .and_modify(|lock| lock.inflight += 1)
            .or_insert_with(|| GroupLock {
                holder: message_id.to_string(),
                inflight: 1,
            });
    }

    /// One inflight message of the group left flight. Returns true when the
    /// group fully unlocked.
    pub fn release(&mut self, group_id: &str) -> bool {
        match self.locks.get_mut(group_id) {
            Some(lock) if lock.inflight > 1 => {
                lock.inflight -= 1;
                false
            }
            Some(_) => {
                self.locks.remove(group_id);
                true
            }
            None => false,
        }
    }

    pub fn holder(&self, group_id: &str) -> Option<&str> {
        self.locks.get(group_id).map(|l| l.holder.as_str())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn clear(&mut self) {
        self.locks.clear();
    }
}
