//! Optional persistence.
//!
//! A snapshot is a single JSON document of every queue and message. Receipt
//! handles are process-local, so inflight records come back as pending with
//! the recorded deadline as their visible-at time: the restored process
//! re-delivers once the old visibility window would have lapsed
//! (at-least-once across the restart). Restoring a queue also restores its
//! sequence counter so new order indexes stay above every recorded one.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::digest::{md5_hex, md5_of_attributes};
use crate::manager::QueueManager;
use crate::message::{Message, MessageAttributeValue, MessageState};
use crate::queue::{Queue, QueueAttributes};

pub const SNAPSHOT_FILE: &str = "minisqs-snapshot.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub queues: Vec<QueueRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub created_at: u64,
    pub last_modified: u64,
    pub seq: u64,
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub state: MessageStateRecord,
    pub sent_at: u64,
    pub first_received_at: Option<u64>,
    pub receive_count: u32,
    pub order_index: u64,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageStateRecord {
    Pending { visible_at: u64 },
    Inflight { deadline: u64 },
}

pub async fn save(manager: &QueueManager, dir: &Path) -> io::Result<()> {
    let mut queues = Vec::new();
    for handle in manager.all_handles().await {
        let queue = handle.queue.lock().await;
        let messages = queue
            .messages_in_order()
            .into_iter()
            .map(|msg| MessageRecord {
                id: msg.id.clone(),
                body: msg.body.clone(),
                attributes: msg.attributes.clone(),
                state: match &msg.state {
                    MessageState::Pending { visible_at } => MessageStateRecord::Pending {
                        visible_at: *visible_at,
                    },
                    MessageState::Inflight { deadline, .. } => MessageStateRecord::Inflight {
                        deadline: *deadline,
                    },
                },
                sent_at: msg.sent_at,
                first_received_at: msg.first_received_at,
                receive_count: msg.receive_count,
                order_index: msg.order_index,
                group_id: msg.group_id.clone(),
                dedup_id: msg.dedup_id.clone(),
            })
            .collect();
        queues.push(QueueRecord {
            name: queue.name.clone(),
            attributes: queue.attributes.to_map(),
            created_at: queue.created_at,
            last_modified: queue.last_modified,
            seq: queue.seq(),
            messages,
        });
    }

    let snapshot = Snapshot {
        saved_at: Utc::now(),
        queues,
    };
    let path = dir.join(SNAPSHOT_FILE);
    let file = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, &snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    info!(path = %path.display(), queues = snapshot.queues.len(), "saved snapshot");
    Ok(())
}

/// Load a snapshot if one exists. Returns the number of queues restored.
pub async fn load(manager: &QueueManager, dir: &Path) -> io::Result<usize> {
    let path = dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(0);
    }
    let file = std::fs::File::open(&path)?;
    let snapshot: Snapshot =
        serde_json::from_reader(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let restored = snapshot.queues.len();
    for record in snapshot.queues {
        let queue = restore_queue(manager, record)?;
        manager.install_queue(queue).await;
    }
    info!(path = %path.display(), queues = restored, "restored snapshot");
    Ok(restored)
}

fn restore_queue(manager: &QueueManager, record: QueueRecord) -> io::Result<Queue> {
    let fifo = record
        .attributes
        .get("FifoQueue")
        .map(|v| v == "true")
        .unwrap_or(false);
    let mut attributes = QueueAttributes {
        fifo_queue: fifo,
        ..QueueAttributes::default()
    };
    let mut attr_map = record.attributes;
    attr_map.remove("FifoQueue");
    attributes
        .apply(&attr_map)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let url = manager.queue_url(&record.name);
    let mut queue = Queue::new(record.name, url, attributes, manager.clock().clone());
    queue.created_at = record.created_at;
    queue.last_modified = record.last_modified;
    queue.restore_seq(record.seq);

    for msg in record.messages {
        let visible_at = match msg.state {
            MessageStateRecord::Pending { visible_at } => visible_at,
            // Receipt handles do not survive the process; re-deliver after
            // the recorded deadline.
            MessageStateRecord::Inflight { deadline } => deadline,
        };
        let md5_of_body = md5_hex(msg.body.as_bytes());
        let md5_attrs = md5_of_attributes(&msg.attributes);
        queue.restore_message(Message {
            id: msg.id,
            body: msg.body,
            md5_of_body,
            attributes: msg.attributes,
            md5_of_attributes: md5_attrs,
            sent_at: msg.sent_at,
            first_received_at: msg.first_received_at,
            receive_count: msg.receive_count,
            state: MessageState::Pending { visible_at },
            order_index: msg.order_index,
            group_id: msg.group_id,
            dedup_id: msg.dedup_id,
            counted_delayed: false,
        });
    }
    Ok(queue)
}
