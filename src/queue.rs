//! Single-queue state engine.
//!
//! A `Queue` owns its message store, deduplication index, and group lock
//! table. It is synchronous; the manager wraps each queue in a mutex so all
//! operations on one queue are serialized while distinct queues run in
//! parallel.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::clock::Clock;
use crate::dedup::DeduplicationIndex;
use crate::digest::{md5_hex, md5_of_attributes, sha256_hex};
use crate::error::SqsError;
use crate::groups::GroupLockTable;
use crate::message::{attributes_size, Message, MessageState};
use crate::store::MessageStore;
use crate::types::{QueueStats, ReceivedMessage, SendMessageCommand, SendResult};

pub const MAX_VISIBILITY_TIMEOUT_SECS: i64 = 43_200;
pub const MAX_DELAY_SECS: i64 = 900;
pub const MAX_WAIT_TIME_SECS: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub delay_seconds: u32,
    pub receive_message_wait_time_seconds: u32,
    pub message_retention_period: u32,
    pub maximum_message_size: u32,
    pub fifo_queue: bool,
    pub content_based_deduplication: bool,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            visibility_timeout: 30,
            delay_seconds: 0,
            receive_message_wait_time_seconds: 0,
            message_retention_period: 345_600,
            maximum_message_size: 262_144,
            fifo_queue: false,
            content_based_deduplication: false,
        }
    }
}

impl QueueAttributes {
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("VisibilityTimeout".into(), self.visibility_timeout.to_string());
        m.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        m.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        m.insert(
            "MessageRetentionPeriod".into(),
            self.message_retention_period.to_string(),
        );
        m.insert("MaximumMessageSize".into(), self.maximum_message_size.to_string());
        m.insert("FifoQueue".into(), self.fifo_queue.to_string());
        if self.fifo_queue {
            m.insert(
                "ContentBasedDeduplication".into(),
                self.content_based_deduplication.to_string(),
            );
        }
        m
    }

    pub fn apply(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        for (key, value) in attrs {
            match key.as_str() {
                "VisibilityTimeout" => {
                    let v: u32 = value.parse().map_err(|_| {
                        SqsError::InvalidAttributeValue(format!("Invalid VisibilityTimeout: {value}"))
                    })?;
                    if v > 43_200 {
                        return Err(SqsError::InvalidAttributeValue(
                            "VisibilityTimeout must be between 0 and 43200".into(),
                        ));
                    }
                    self.visibility_timeout = v;
                }
                "DelaySeconds" => {
                    let v: u32 = value.parse().map_err(|_| {
                        SqsError::InvalidAttributeValue(format!("Invalid DelaySeconds: {value}"))
                    })?;
                    if v > 900 {
                        return Err(SqsError::InvalidAttributeValue(
                            "DelaySeconds must be between 0 and 900".into(),
                        ));
                    }
                    self.delay_seconds = v;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    let v: u32 = value.parse().map_err(|_| {
                        SqsError::InvalidAttributeValue(format!(
                            "Invalid ReceiveMessageWaitTimeSeconds: {value}"
                        ))
                    })?;
                    if v > 20 {
                        return Err(SqsError::InvalidAttributeValue(
                            "ReceiveMessageWaitTimeSeconds must be between 0 and 20".into(),
                        ));
                    }
                    self.receive_message_wait_time_seconds = v;
                }
                "MessageRetentionPeriod" => {
                    let v: u32 = value.parse().map_err(|_| {
                        SqsError::InvalidAttributeValue(format!(
                            "Invalid MessageRetentionPeriod: {value}"
                        ))
                    })?;
                    if !(60..=1_209_600).contains(&v) {
                        return Err(SqsError::InvalidAttributeValue(
                            "MessageRetentionPeriod must be between 60 and 1209600".into(),
                        ));
                    }
                    self.message_retention_period = v;
                }
                "MaximumMessageSize" => {
                    let v: u32 = value.parse().map_err(|_| {
                        SqsError::InvalidAttributeValue(format!(
                            "Invalid MaximumMessageSize: {value}"
                        ))
                    })?;
                    if !(1_024..=262_144).contains(&v) {
                        return Err(SqsError::InvalidAttributeValue(
                            "MaximumMessageSize must be between 1024 and 262144".into(),
                        ));
                    }
                    self.maximum_message_size = v;
                }
                "FifoQueue" => {
                    self.fifo_queue = value == "true";
                }
                "ContentBasedDeduplication" => {
                    self.content_based_deduplication = value == "true";
                }
                _ => {
                    return Err(SqsError::InvalidAttributeName(format!(
                        "Unknown attribute: {key}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of a time tick, used to decide whether parked receivers should be
/// woken.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    pub newly_eligible: bool,
}

pub struct Queue {
    pub name: String,
    pub url: String,
    pub attributes: QueueAttributes,
    store: MessageStore,
    dedup: DeduplicationIndex,
    groups: GroupLockTable,
    clock: Clock,
    seq: u64,
    pub(crate) created_at: u64,
    pub(crate) last_modified: u64,
}

impl Queue {
    pub fn new(name: String, url: String, attributes: QueueAttributes, clock: Clock) -> Self {
        let now = clock.now_millis();
        Queue {
            name,
            url,
            attributes,
            store: MessageStore::new(),
            dedup: DeduplicationIndex::new(),
            groups: GroupLockTable::new(),
            clock,
            seq: 0,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn is_fifo(&self) -> bool {
        self.attributes.fifo_queue
    }

    pub fn message_count(&self) -> usize {
        self.store.len()
    }

    pub fn statistics(&self) -> QueueStats {
        self.store.stats()
    }

    pub fn send_message(&mut self, cmd: SendMessageCommand) -> Result<SendResult, SqsError> {
        let now = self.clock.now_millis();

        if cmd.body.is_empty() {
            return Err(SqsError::InvalidParameterValue(
                "The message body must not be empty".into(),
            ));
        }
        for (name, attr) in &cmd.attributes {
            attr.validate(name)?;
        }
        let size = cmd.body.len() + attributes_size(&cmd.attributes);
        if size > self.attributes.maximum_message_size as usize {
            return Err(SqsError::MessageTooLong(format!(
                "One or more parameters are invalid. Reason: Message must be shorter than {} bytes",
                self.attributes.maximum_message_size
            )));
        }
        if let Some(delay) = cmd.delay_seconds {
            if i64::from(delay) > MAX_DELAY_SECS {
                return Err(SqsError::InvalidParameterValue(
                    "DelaySeconds must be between 0 and 900".into(),
                ));
            }
        }

        let dedup_id = if self.is_fifo() {
            let group_id = cmd.group_id.as_deref().ok_or_else(|| {
                SqsError::MissingParameter(
                    "The request must contain the parameter MessageGroupId.".into(),
                )
            })?;
            validate_group_id(group_id)?;
            if cmd.delay_seconds.map_or(false, |d| d > 0) {
                return Err(SqsError::InvalidParameterValue(
                    "DelaySeconds is not supported for messages in FIFO queues".into(),
                ));
            }
            match cmd.dedup_id.clone() {
                Some(id) => Some(id),
                None if self.attributes.content_based_deduplication => {
                    Some(sha256_hex(cmd.body.as_bytes()))
                }
                None => {
                    return Err(SqsError::InvalidParameterValue(
                        "The queue should either have ContentBasedDeduplication enabled or MessageDeduplicationId provided explicitly".into(),
                    ));
                }
            }
        } else {
            if cmd.group_id.is_some() {
                return Err(SqsError::InvalidParameterValue(
                    "MessageGroupId is valid only for FIFO queues".into(),
                ));
            }
            if cmd.dedup_id.is_some() {
                return Err(SqsError::InvalidParameterValue(
                    "MessageDeduplicationId is valid only for FIFO queues".into(),
                ));
            }
            None
        };

        // Idempotent replay inside the five-minute window.
        if let Some(ref did) = dedup_id {
            if let Some(original) = self.dedup.lookup(did, now) {
                return Ok(original.clone());
            }
        }

        self.seq += 1;
        let order_index = self.seq;
        let message_id = Uuid::new_v4().to_string();
        let md5_of_body = md5_hex(cmd.body.as_bytes());
        let md5_attrs = md5_of_attributes(&cmd.attributes);
        let sequence_number = self.is_fifo().then(|| format!("{order_index:020}"));

        let delay_secs = u64::from(cmd.delay_seconds.unwrap_or(self.attributes.delay_seconds));
        let visible_at = now + delay_secs * 1_000;

        let msg = Message {
            id: message_id.clone(),
            body: cmd.body,
            md5_of_body: md5_of_body.clone(),
            attributes: cmd.attributes,
            md5_of_attributes: md5_attrs.clone(),
            sent_at: now,
            first_received_at: None,
            receive_count: 0,
            state: MessageState::Pending { visible_at },
            order_index,
            group_id: cmd.group_id,
            dedup_id: dedup_id.clone(),
            counted_delayed: false,
        };
        self.store.insert(msg, now);

        let result = SendResult {
            message_id,
            md5_of_body,
            md5_of_attributes: md5_attrs,
            sequence_number,
        };
        if let Some(did) = dedup_id {
            self.dedup.insert(did, result.clone(), now);
        }
        Ok(result)
    }

    /// One non-blocking selection pass. Long-poll waiting is layered on top
    /// by the manager.
    pub fn receive_messages(
        &mut self,
        max_messages: Option<i64>,
        visibility_timeout: Option<i64>,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        let max = max_messages.unwrap_or(1);
        if !(1..=10).contains(&max) {
            return Err(SqsError::InvalidParameterValue(
                "MaxNumberOfMessages must be between 1 and 10".into(),
            ));
        }
        let vis_secs = visibility_timeout.unwrap_or(i64::from(self.attributes.visibility_timeout));
        if !(0..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&vis_secs) {
            return Err(SqsError::InvalidParameterValue(
                "VisibilityTimeout must be between 0 and 43200".into(),
            ));
        }

        let now = self.clock.now_millis();
        self.tick(now);

        let selected = if self.is_fifo() {
            self.select_fifo(max as usize, now)
        } else {
            self.select_standard(max as usize, now)
        };

        let deadline = now + vis_secs as u64 * 1_000;
        let mut results = Vec::with_capacity(selected.len());
        for id in selected {
            let receipt_handle = Uuid::new_v4().to_string();
            self.store.mark_inflight(&id, receipt_handle.clone(), deadline);
            self.store.record_delivery(&id, now);
            let msg = match self.store.get(&id) {
                Some(m) => m,
                None => continue,
            };
            if let Some(gid) = msg.group_id.clone() {
                self.groups.acquire(&gid, &id);
            }
            results.push(build_received(msg, receipt_handle));
        }
        Ok(results)
    }

    /// FIFO selection: strictly ascending order index, one message per
    /// unlocked group per batch. A group whose earliest pending message is
    /// not yet visible is skipped entirely so later messages cannot jump
    /// ahead.
    fn select_fifo(&self, max: usize, now: u64) -> Vec<String> {
        let mut selected = Vec::new();
        let mut seen_groups: HashSet<String> = HashSet::new();
        let mut blocked_groups: HashSet<String> = HashSet::new();

        for (_, id) in self.store.iter_order() {
            if selected.len() >= max {
                break;
            }
            let Some(msg) = self.store.get(id) else { continue };
            let Some(gid) = msg.group_id.as_deref() else { continue };
            if self.groups.is_locked(gid)
                || seen_groups.contains(gid)
                || blocked_groups.contains(gid)
            {
                continue;
            }
            match &msg.state {
                MessageState::Pending { visible_at } if *visible_at <= now => {
                    seen_groups.insert(gid.to_string());
                    selected.push(id.clone());
                }
                MessageState::Pending { .. } => {
                    blocked_groups.insert(gid.to_string());
                }
                MessageState::Inflight { .. } => {}
            }
        }
        selected
    }

    /// Standard selection: oldest-visible-first through the time index. The
    /// order is explicitly approximate.
    fn select_standard(&self, max: usize, now: u64) -> Vec<String> {
        let mut selected = Vec::new();
        for (time, order) in self.store.iter_time() {
            if selected.len() >= max || *time > now {
                break;
            }
            let Some(id) = self.store.id_for_order(*order) else { continue };
            let Some(msg) = self.store.get(id) else { continue };
            if matches!(msg.state, MessageState::Pending { .. }) {
                selected.push(id.to_string());
            }
        }
        selected
    }

    pub fn delete_message(&mut self, receipt_handle: &str) -> Result<(), SqsError> {
        let now = self.clock.now_millis();
        self.tick(now);

        let id = self
            .store
            .receipt_message_id(receipt_handle)
            .map(str::to_string)
            .ok_or_else(|| {
                SqsError::ReceiptHandleIsInvalid(format!(
                    "The receipt handle \"{receipt_handle}\" is not valid."
                ))
            })?;
        if let Some(msg) = self.store.remove(&id) {
            if let Some(gid) = msg.group_id {
                self.groups.release(&gid);
            }
        }
        Ok(())
    }

    pub fn change_message_visibility(
        &mut self,
        receipt_handle: &str,
        visibility_timeout: i64,
    ) -> Result<(), SqsError> {
        if !(0..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&visibility_timeout) {
            return Err(SqsError::InvalidParameterValue(
                "VisibilityTimeout must be between 0 and 43200".into(),
            ));
        }
        let now = self.clock.now_millis();
        self.tick(now);

        let id = self
            .store
            .receipt_message_id(receipt_handle)
            .map(str::to_string)
            .ok_or_else(|| {
                SqsError::ReceiptHandleIsInvalid(format!(
                    "The receipt handle \"{receipt_handle}\" is not valid."
                ))
            })?;
        if visibility_timeout == 0 {
            if let Some(gid) = self.store.release(&id, now, now) {
                self.groups.release(&gid);
            }
        } else {
            self.store
                .extend_deadline(&id, now + visibility_timeout as u64 * 1_000);
        }
        Ok(())
    }

    /// Purge drops every message and group lock. The deduplication window
    /// intentionally survives: a replayed send right after a purge still
    /// deduplicates.
    pub fn purge(&mut self) {
        self.store.clear();
        self.groups.clear();
    }

    /// Advance time-driven transitions: retention eviction, visibility
    /// expiry, delayed-message promotion, dedup sweep.
    pub fn tick(&mut self, now: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let retention_millis = u64::from(self.attributes.message_retention_period) * 1_000;

        // Retention: arrival order is sent order, so expired messages form a
        // prefix of the order index.
        loop {
            let Some(oldest) = self.store.oldest_sent_at() else { break };
            if now.saturating_sub(oldest) <= retention_millis {
                break;
            }
            let Some((_, id)) = self.store.iter_order().next() else { break };
            let id = id.clone();
            if let Some(msg) = self.store.remove(&id) {
                if matches!(msg.state, MessageState::Inflight { .. }) {
                    if let Some(gid) = msg.group_id {
                        self.groups.release(&gid);
                    }
                }
            }
        }

        enum Due {
            Expire,
            Promote { was_delayed: bool },
            Skip,
        }

        for order in self.store.due_order_indexes(now) {
            let Some(id) = self.store.id_for_order(order).map(str::to_string) else {
                continue;
            };
            let due = match self.store.get(&id) {
                Some(msg) => match &msg.state {
                    MessageState::Inflight { deadline, .. } if *deadline <= now => Due::Expire,
                    MessageState::Pending { visible_at } if *visible_at <= now => Due::Promote {
                        was_delayed: msg.counted_delayed,
                    },
                    _ => Due::Skip,
                },
                None => Due::Skip,
            };
            match due {
                Due::Expire => {
                    if let Some(gid) = self.store.release(&id, now, now) {
                        self.groups.release(&gid);
                    }
                    outcome.newly_eligible = true;
                }
                Due::Promote { was_delayed } => {
                    if was_delayed {
                        outcome.newly_eligible = true;
                    }
                    self.store.note_visible(&id);
                }
                Due::Skip => {}
            }
        }

        self.dedup.sweep(now);
        outcome
    }

    /// Earliest future time at which this queue changes state on its own.
    pub fn next_deadline(&self, now: u64) -> Option<u64> {
        let transition = self.store.next_index_time_after(now);
        let retention = self.store.oldest_sent_at().map(|sent| {
            sent + u64::from(self.attributes.message_retention_period) * 1_000
        });
        match (transition, retention) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn get_attributes(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, String>, SqsError> {
        const COMPUTED: [&str; 5] = [
            "ApproximateNumberOfMessages",
            "ApproximateNumberOfMessagesNotVisible",
            "ApproximateNumberOfMessagesDelayed",
            "CreatedTimestamp",
            "LastModifiedTimestamp",
        ];

        let static_map = self.attributes.to_map();
        for name in names {
            if name != "All" && !static_map.contains_key(name) && !COMPUTED.contains(&name.as_str())
            {
                // ContentBasedDeduplication is absent from the static map for
                // standard queues but still a valid name.
                if name != "ContentBasedDeduplication" {
                    return Err(SqsError::InvalidAttributeName(format!(
                        "Unknown attribute name: {name}"
                    )));
                }
            }
        }

        let all = names.is_empty() || names.iter().any(|n| n == "All");
        let include = |attr: &str| all || names.iter().any(|n| n == attr);

        let mut result = HashMap::new();
        for (key, value) in static_map {
            if include(&key) {
                result.insert(key, value);
            }
        }
        let stats = self.statistics();
        if include("ApproximateNumberOfMessages") {
            result.insert("ApproximateNumberOfMessages".into(), stats.visible.to_string());
        }
        if include("ApproximateNumberOfMessagesNotVisible") {
            result.insert(
                "ApproximateNumberOfMessagesNotVisible".into(),
                stats.inflight.to_string(),
            );
        }
        if include("ApproximateNumberOfMessagesDelayed") {
            result.insert(
                "ApproximateNumberOfMessagesDelayed".into(),
                stats.delayed.to_string(),
            );
        }
        if include("CreatedTimestamp") {
            result.insert("CreatedTimestamp".into(), (self.created_at / 1_000).to_string());
        }
        if include("LastModifiedTimestamp") {
            result.insert(
                "LastModifiedTimestamp".into(),
                (self.last_modified / 1_000).to_string(),
            );
        }
        Ok(result)
    }

    pub fn set_attributes(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        if attrs.contains_key("FifoQueue") {
            return Err(SqsError::InvalidAttributeName(
                "FifoQueue cannot be changed after queue creation".into(),
            ));
        }
        self.attributes.apply(attrs)?;
        self.last_modified = self.clock.now_millis();
        Ok(())
    }

    // Snapshot support.

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn restore_seq(&mut self, seq: u64) {
        self.seq = self.seq.max(seq);
    }

    pub(crate) fn messages_in_order(&self) -> Vec<&Message> {
        self.store
            .iter_order()
            .filter_map(|(_, id)| self.store.get(id))
            .collect()
    }

    pub(crate) fn restore_message(&mut self, msg: Message) {
        let now = self.clock.now_millis();
        self.seq = self.seq.max(msg.order_index);
        self.store.insert(msg, now);
    }
}

fn validate_group_id(group_id: &str) -> Result<(), SqsError> {
    let valid_len = (1..=128).contains(&group_id.len());
    let valid_chars = group_id.chars().all(|c| ('!'..='~').contains(&c));
    if !valid_len || !valid_chars {
        return Err(SqsError::InvalidParameterValue(
            "MessageGroupId can contain up to 128 printable ASCII characters".into(),
        ));
    }
    Ok(())
}

fn build_received(msg: &Message, receipt_handle: String) -> ReceivedMessage {
    let mut system_attributes = HashMap::new();
    system_attributes.insert("SentTimestamp".into(), msg.sent_at.to_string());
    system_attributes.insert(
        "ApproximateReceiveCount".into(),
        msg.receive_count.to_string(),
    );
    if let Some(first) = msg.first_received_at {
        system_attributes.insert("ApproximateFirstReceiveTimestamp".into(), first.to_string());
    }
    if let Some(ref gid) = msg.group_id {
        system_attributes.insert("MessageGroupId".into(), gid.clone());
    }
    if let Some(ref did) = msg.dedup_id {
        system_attributes.insert("MessageDeduplicationId".into(), did.clone());
    }
    if msg.group_id.is_some() {
        system_attributes.insert("SequenceNumber".into(), format!("{:020}", msg.order_index));
    }

    ReceivedMessage {
        message_id: msg.id.clone(),
        receipt_handle,
        body: msg.body.clone(),
        md5_of_body: msg.md5_of_body.clone(),
        md5_of_attributes: msg.md5_of_attributes.clone(),
        system_attributes,
        message_attributes: msg.attributes.clone(),
    }
}
