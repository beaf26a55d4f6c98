//! Typed commands and results exchanged between the wire adapter and the
//! queue engine, one per supported action.

use std::collections::HashMap;

use crate::message::MessageAttributeValue;

#[derive(Debug, Clone, Default)]
pub struct SendMessageCommand {
    pub body: String,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub delay_seconds: Option<u32>,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub message_id: String,
    pub md5_of_body: String,
    pub md5_of_attributes: Option<String>,
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveCommand {
    pub max_messages: Option<i64>,
    pub visibility_timeout: Option<i64>,
    pub wait_time_seconds: Option<i64>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    pub md5_of_attributes: Option<String>,
    pub system_attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub visible: usize,
    pub inflight: usize,
    pub delayed: usize,
}

#[derive(Debug, Clone)]
pub struct BatchEntryError {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

#[derive(Debug, Clone)]
pub struct SendMessageBatchEntry {
    pub id: String,
    pub command: SendMessageCommand,
}

#[derive(Debug, Clone)]
pub struct SendMessageBatchResultEntry {
    pub id: String,
    pub result: SendResult,
}

#[derive(Debug, Clone)]
pub struct DeleteMessageBatchEntry {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct ChangeVisibilityBatchEntry {
    pub id: String,
    pub receipt_handle: String,
    pub visibility_timeout: i64,
}

/// Per-entry outcome of a batch action; entries succeed or fail
/// independently.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome<T> {
    pub successful: Vec<T>,
    pub failed: Vec<BatchEntryError>,
}

impl<T> BatchOutcome<T> {
    pub fn new() -> Self {
        BatchOutcome {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}
