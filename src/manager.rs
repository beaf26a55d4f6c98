//! Queue registry and the async surface the wire adapter calls.
//!
//! The registry lock is read-mostly; every queue sits behind its own mutex,
//! so operations on distinct queues run in parallel while all operations on
//! one queue serialize. Long-poll receives park on the queue's wait registry
//! and re-attempt under the lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::SqsError;
use crate::queue::{Queue, QueueAttributes, MAX_WAIT_TIME_SECS};
use crate::types::{
    BatchEntryError, BatchOutcome, ChangeVisibilityBatchEntry, DeleteMessageBatchEntry,
    QueueStats, ReceiveCommand, ReceivedMessage, SendMessageBatchEntry,
    SendMessageBatchResultEntry, SendMessageCommand, SendResult,
};
use crate::waiters::WaitRegistry;

pub struct QueueHandle {
    pub name: String,
    pub queue: Mutex<Queue>,
    pub waiters: WaitRegistry,
}

pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<QueueHandle>>>,
    clock: Clock,
    base_url: String,
    account_id: String,
    rearm: Notify,
}

impl QueueManager {
    pub fn new(base_url: String, account_id: String, clock: Clock) -> Self {
        QueueManager {
            queues: RwLock::new(HashMap::new()),
            clock,
            base_url,
            account_id,
            rearm: Notify::new(),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Signal the delay dispatcher that a deadline may have moved earlier.
    /// Uses the stored-permit form so a signal sent while the dispatcher is
    /// mid-tick is not lost.
    pub(crate) fn rearm_dispatcher(&self) {
        self.rearm.notify_one();
    }

    pub(crate) async fn wait_for_rearm(&self) {
        self.rearm.notified().await;
    }

    pub(crate) async fn all_handles(&self) -> Vec<Arc<QueueHandle>> {
        self.queues.read().await.values().cloned().collect()
    }

    pub(crate) fn queue_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.account_id, name)
    }

    fn resolve_queue_name(queue_url: &str) -> Result<String, SqsError> {
        queue_url
            .split('/')
            .next_back()
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| SqsError::QueueDoesNotExist("Invalid queue URL".into()))
    }

    async fn get_handle(&self, name: &str) -> Result<Arc<QueueHandle>, SqsError> {
        self.queues.read().await.get(name).cloned().ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist.".into())
        })
    }

    async fn handle_for_url(&self, queue_url: &str) -> Result<Arc<QueueHandle>, SqsError> {
        let name = Self::resolve_queue_name(queue_url)?;
        self.get_handle(&name).await
    }

    fn validate_queue_name(name: &str, is_fifo: bool) -> Result<(), SqsError> {
        if name.is_empty() || name.len() > 80 {
            return Err(SqsError::InvalidParameterValue(
                "Queue name must be 1-80 characters".into(),
            ));
        }
        let base = if is_fifo {
            name.strip_suffix(".fifo").ok_or_else(|| {
                SqsError::InvalidParameterValue("FIFO queue name must end with .fifo".into())
            })?
        } else {
            if name.ends_with(".fifo") {
                return Err(SqsError::InvalidParameterValue(
                    "Non-FIFO queue name must not end with .fifo".into(),
                ));
            }
            name
        };
        let valid = !base.is_empty()
            && base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SqsError::InvalidParameterValue(
                "Queue name can only contain alphanumeric characters, hyphens, and underscores"
                    .into(),
            ));
        }
        Ok(())
    }

    fn validate_batch_ids(ids: &[&str]) -> Result<(), SqsError> {
        if ids.is_empty() {
            return Err(SqsError::EmptyBatchRequest(
                "There should be at least one entry in the batch request".into(),
            ));
        }
        if ids.len() > 10 {
            return Err(SqsError::TooManyEntriesInBatchRequest(
                "The batch request contains more entries than permissible (10)".into(),
            ));
        }
        let mut seen = HashSet::new();
        for id in ids {
            let valid = !id.is_empty()
                && id.len() <= 80
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(SqsError::InvalidBatchEntryId(format!(
                    "A batch entry id can only contain alphanumeric characters, hyphens and underscores: {id}"
                )));
            }
            if !seen.insert(*id) {
                return Err(SqsError::BatchEntryIdsNotDistinct(format!(
                    "Id {id} repeated"
                )));
            }
        }
        Ok(())
    }

    pub async fn create_queue(
        &self,
        queue_name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, SqsError> {
        let is_fifo = attributes
            .get("FifoQueue")
            .map(|v| v == "true")
            .unwrap_or_else(|| queue_name.ends_with(".fifo"));
        Self::validate_queue_name(queue_name, is_fifo)?;

        let mut queues = self.queues.write().await;

        if let Some(existing) = queues.get(queue_name) {
            let queue = existing.queue.lock().await;
            let current = queue.attributes.to_map();
            for (key, value) in attributes {
                if current.get(key).map(String::as_str) != Some(value.as_str()) {
                    return Err(SqsError::QueueAlreadyExists(format!(
                        "A queue named {queue_name} already exists with different attributes"
                    )));
                }
            }
            return Ok(queue.url.clone());
        }

        let mut queue_attributes = QueueAttributes {
            fifo_queue: is_fifo,
            ..QueueAttributes::default()
        };
        let mut attributes = attributes.clone();
        attributes.remove("FifoQueue");
        queue_attributes.apply(&attributes)?;

        let url = self.queue_url(queue_name);
        let queue = Queue::new(
            queue_name.to_string(),
            url.clone(),
            queue_attributes,
            self.clock.clone(),
        );
        queues.insert(
            queue_name.to_string(),
            Arc::new(QueueHandle {
                name: queue_name.to_string(),
                queue: Mutex::new(queue),
                waiters: WaitRegistry::new(),
            }),
        );
        info!(queue = queue_name, fifo = is_fifo, "created queue");
        Ok(url)
    }

    /// Install an already-built queue, replacing any queue of the same name.
    /// Used by snapshot restore.
    pub(crate) async fn install_queue(&self, queue: Queue) {
        let name = queue.name.clone();
        let handle = Arc::new(QueueHandle {
            name: name.clone(),
            queue: Mutex::new(queue),
            waiters: WaitRegistry::new(),
        });
        self.queues.write().await.insert(name, handle);
    }

    /// Deletion is terminal: parked receives wake and observe the missing
    /// queue.
    pub async fn delete_queue(&self, queue_url: &str) -> Result<(), SqsError> {
        let name = Self::resolve_queue_name(queue_url)?;
        let removed = self.queues.write().await.remove(&name);
        match removed {
            Some(handle) => {
                info!(queue = %name, "deleted queue");
                handle.waiters.wake_all();
                Ok(())
            }
            None => Err(SqsError::QueueDoesNotExist(
                "The specified queue does not exist.".into(),
            )),
        }
    }

    pub async fn get_queue_url(&self, queue_name: &str) -> Result<String, SqsError> {
        let handle = self.get_handle(queue_name).await?;
        let url = handle.queue.lock().await.url.clone();
        Ok(url)
    }

    pub async fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let queues = self.queues.read().await;
        let mut names: Vec<&String> = queues
            .keys()
            .filter(|n| prefix.map_or(true, |p| n.starts_with(p)))
            .collect();
        names.sort();
        let mut urls = Vec::with_capacity(names.len().min(1_000));
        for name in names.into_iter().take(1_000) {
            if let Some(handle) = queues.get(name) {
                urls.push(handle.queue.lock().await.url.clone());
            }
        }
        urls
    }

    pub async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        let mut queue = handle.queue.lock().await;
        let now = self.clock.now_millis();
        queue.tick(now);
        queue.get_attributes(attribute_names)
    }

    pub async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        let mut queue = handle.queue.lock().await;
        queue.set_attributes(attributes)
    }

    pub async fn purge_queue(&self, queue_url: &str) -> Result<(), SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        let mut queue = handle.queue.lock().await;
        queue.purge();
        info!(queue = %handle.name, "purged queue");
        Ok(())
    }

    pub async fn queue_statistics(&self, queue_url: &str) -> Result<QueueStats, SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        let mut queue = handle.queue.lock().await;
        let now = self.clock.now_millis();
        queue.tick(now);
        Ok(queue.statistics())
    }

    pub async fn send_message(
        &self,
        queue_url: &str,
        command: SendMessageCommand,
    ) -> Result<SendResult, SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        let result = {
            let mut queue = handle.queue.lock().await;
            let result = queue.send_message(command)?;
            debug!(queue = %handle.name, message_id = %result.message_id, "sent message");
            if queue.statistics().visible > 0 {
                handle.waiters.wake_all();
            }
            result
        };
        self.rearm_dispatcher();
        Ok(result)
    }

    pub async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SendMessageBatchEntry>,
    ) -> Result<BatchOutcome<SendMessageBatchResultEntry>, SqsError> {
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        Self::validate_batch_ids(&ids)?;

        let handle = self.handle_for_url(queue_url).await?;
        let mut outcome = BatchOutcome::new();
        {
            let mut queue = handle.queue.lock().await;
            for entry in entries {
                match queue.send_message(entry.command) {
                    Ok(result) => outcome.successful.push(SendMessageBatchResultEntry {
                        id: entry.id,
                        result,
                    }),
                    Err(err) => outcome.failed.push(batch_error(entry.id, &err)),
                }
            }
            if !outcome.successful.is_empty() && queue.statistics().visible > 0 {
                handle.waiters.wake_all();
            }
        }
        self.rearm_dispatcher();
        Ok(outcome)
    }

    pub async fn receive_message(
        &self,
        queue_url: &str,
        command: ReceiveCommand,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        let name = Self::resolve_queue_name(queue_url)?;
        if let Some(wait) = command.wait_time_seconds {
            if !(0..=MAX_WAIT_TIME_SECS).contains(&wait) {
                return Err(SqsError::InvalidParameterValue(
                    "WaitTimeSeconds must be between 0 and 20".into(),
                ));
            }
        }

        let mut deadline: Option<u64> = None;
        loop {
            let handle = self.get_handle(&name).await?;
            let mut notified = std::pin::pin!(handle.waiters.notified());
            {
                let mut queue = handle.queue.lock().await;
                let messages =
                    queue.receive_messages(command.max_messages, command.visibility_timeout)?;
                if deadline.is_none() {
                    let wait_secs = command.wait_time_seconds.unwrap_or(i64::from(
                        queue.attributes.receive_message_wait_time_seconds,
                    )) as u64;
                    deadline = Some(self.clock.now_millis() + wait_secs * 1_000);
                }
                if !messages.is_empty() {
                    drop(queue);
                    self.rearm_dispatcher();
                    return Ok(filter_received(
                        messages,
                        &command.attribute_names,
                        &command.message_attribute_names,
                    ));
                }
                // Register for wakeups while the queue lock still excludes
                // senders, so nothing lands unseen between check and park.
                notified.as_mut().enable();
            }

            let now = self.clock.now_millis();
            let deadline_at = deadline.unwrap_or(now);
            if now >= deadline_at {
                return Ok(Vec::new());
            }
            let remaining = Duration::from_millis(deadline_at - now);
            let _parked = handle.waiters.park();
            let _ = tokio::time::timeout(remaining, &mut notified).await;
        }
    }

    pub async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        let mut queue = handle.queue.lock().await;
        queue.delete_message(receipt_handle)?;
        // Deleting an inflight FIFO message can unlock its group and expose
        // the next message to parked receivers.
        if queue.is_fifo() && queue.statistics().visible > 0 {
            handle.waiters.wake_all();
        }
        Ok(())
    }

    pub async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteMessageBatchEntry>,
    ) -> Result<BatchOutcome<String>, SqsError> {
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        Self::validate_batch_ids(&ids)?;

        let handle = self.handle_for_url(queue_url).await?;
        let mut queue = handle.queue.lock().await;
        let mut outcome = BatchOutcome::new();
        for entry in entries {
            match queue.delete_message(&entry.receipt_handle) {
                Ok(()) => outcome.successful.push(entry.id),
                Err(err) => outcome.failed.push(batch_error(entry.id, &err)),
            }
        }
        if queue.is_fifo() && queue.statistics().visible > 0 {
            handle.waiters.wake_all();
        }
        Ok(outcome)
    }

    pub async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i64,
    ) -> Result<(), SqsError> {
        let handle = self.handle_for_url(queue_url).await?;
        {
            let mut queue = handle.queue.lock().await;
            queue.change_message_visibility(receipt_handle, visibility_timeout)?;
            if visibility_timeout == 0 && queue.statistics().visible > 0 {
                handle.waiters.wake_all();
            }
        }
        self.rearm_dispatcher();
        Ok(())
    }

    pub async fn change_message_visibility_batch(
        &self,
        queue_url: &str,
        entries: Vec<ChangeVisibilityBatchEntry>,
    ) -> Result<BatchOutcome<String>, SqsError> {
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        Self::validate_batch_ids(&ids)?;

        let handle = self.handle_for_url(queue_url).await?;
        let mut outcome = BatchOutcome::new();
        {
            let mut queue = handle.queue.lock().await;
            for entry in entries {
                match queue
                    .change_message_visibility(&entry.receipt_handle, entry.visibility_timeout)
                {
                    Ok(()) => outcome.successful.push(entry.id),
                    Err(err) => outcome.failed.push(batch_error(entry.id, &err)),
                }
            }
            if queue.statistics().visible > 0 {
                handle.waiters.wake_all();
            }
        }
        self.rearm_dispatcher();
        Ok(outcome)
    }
}

fn batch_error(id: String, err: &SqsError) -> BatchEntryError {
    BatchEntryError {
        id,
        code: err.batch_code().to_string(),
        message: err.message().to_string(),
        sender_fault: !matches!(err, SqsError::Internal(_)),
    }
}

/// Trim a received message down to the attribute names the caller asked
/// for. An empty name list means none; `All` expands; message attribute
/// names support a trailing `.*` wildcard.
fn filter_received(
    messages: Vec<ReceivedMessage>,
    attribute_names: &[String],
    message_attribute_names: &[String],
) -> Vec<ReceivedMessage> {
    messages
        .into_iter()
        .map(|mut msg| {
            if attribute_names.is_empty() {
                msg.system_attributes.clear();
            } else if !attribute_names.iter().any(|n| n == "All") {
                msg.system_attributes
                    .retain(|key, _| attribute_names.iter().any(|n| n == key));
            }

            if message_attribute_names.is_empty() {
                msg.message_attributes.clear();
            } else if !message_attribute_names.iter().any(|n| n == "All") {
                msg.message_attributes.retain(|key, _| {
                    message_attribute_names.iter().any(|n| {
                        n == key
                            || n.strip_suffix(".*")
                                .map_or(false, |prefix| key.starts_with(prefix))
                    })
                });
            }
            if msg.message_attributes.is_empty() {
                msg.md5_of_attributes = None;
            }
            msg
        })
        .collect()
}
