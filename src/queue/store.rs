use super::record::{DeadLetterRecord, StoredMessage};
use super::{Nack, QueueError, QueueMessage, Result, WorkQueue};
use crate::config::QueueConfig;
use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use prost::Message;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

const NEXT_ID_KEY: &[u8] = b"next_id";

/// Delivery semantics for one queue
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub visibility_timeout: Duration,
    pub max_receive_count: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(180),
            max_receive_count: 5,
        }
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            visibility_timeout: config.visibility_timeout.as_duration(),
            max_receive_count: config.max_receive_count,
        }
    }
}

/// A parked message, as shown to operators
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: u64,
    pub body: Vec<u8>,
    pub receive_count: u32,
    pub reason: String,
    pub dead_lettered_at_ms: u64,
}

/// FjallQueue is a durable, visibility-timeout queue in a Fjall keyspace
///
/// Partitions per queue `{name}`:
/// - `{name}_messages`: u64 (big-endian) → StoredMessage (protobuf)
/// - `{name}_meta`: "next_id" → u64 (id counter)
/// - `{name}_dlq`: u64 (big-endian) → DeadLetterRecord (protobuf)
///
/// Several queues may share one keyspace. State transitions on a queue are
/// serialized by an in-process lock so a message is handed to at most one
/// consumer per visibility window.
pub struct FjallQueue {
    name: String,
    keyspace: Keyspace,
    messages: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    next_id: Arc<AtomicU64>,
    options: QueueOptions,
    lock: Mutex<()>,
}

impl FjallQueue {
    /// Open a keyspace that can hold several queues
    pub fn open_keyspace<P: AsRef<Path>>(path: P) -> Result<Keyspace> {
        info!("Opening queue keyspace at: {}", path.as_ref().display());
        Ok(Config::new(path).open()?)
    }

    /// Open or create a standalone queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P, name: &str, options: QueueOptions) -> Result<Self> {
        let keyspace = Self::open_keyspace(path)?;
        Self::open_in(&keyspace, name, options)
    }

    /// Open or create a queue inside an existing keyspace
    pub fn open_in(keyspace: &Keyspace, name: &str, options: QueueOptions) -> Result<Self> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(QueueError::InvalidName(name.to_string()));
        }

        let messages = keyspace.open_partition(
            &format!("{}_messages", name),
            PartitionCreateOptions::default(),
        )?;
        let metadata =
            keyspace.open_partition(&format!("{}_meta", name), PartitionCreateOptions::default())?;
        let dlq =
            keyspace.open_partition(&format!("{}_dlq", name), PartitionCreateOptions::default())?;

        let next_id = metadata
            .get(NEXT_ID_KEY)?
            .map(|bytes| decode_id(&bytes))
            .unwrap_or(0);

        info!(queue = name, next_id, "Queue opened");

        Ok(Self {
            name: name.to_string(),
            keyspace: keyspace.clone(),
            messages,
            metadata,
            dlq,
            next_id: Arc::new(AtomicU64::new(next_id)),
            options,
            lock: Mutex::new(()),
        })
    }

    fn enqueue(&self, body: Vec<u8>) -> Result<u64> {
        // Persisted next_id must never move backwards
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = now_ms();

        let stored = StoredMessage {
            body,
            receive_count: 0,
            visible_at_ms: now,
            receipt_handle: String::new(),
            enqueued_at_ms: now,
        };

        let mut batch = self.keyspace.batch();
        batch.insert(&self.messages, id.to_be_bytes(), stored.encode_to_vec());
        batch.insert(&self.metadata, NEXT_ID_KEY, (id + 1).to_be_bytes());
        batch.commit()?;

        debug!(queue = %self.name, id, "Message enqueued");
        Ok(id)
    }

    fn take_next(&self) -> Result<Option<QueueMessage>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_ms();

        let mut exhausted = Vec::new();
        let mut chosen = None;

        for item in self.messages.iter() {
            let (key, value) = item?;
            let stored = StoredMessage::decode(&*value)?;

            if stored.visible_at_ms > now {
                continue;
            }

            let id = decode_id(&key);
            if stored.receive_count >= self.options.max_receive_count {
                exhausted.push((id, stored));
                continue;
            }

            chosen = Some((id, stored));
            break;
        }

        for (id, stored) in exhausted {
            warn!(
                queue = %self.name,
                id,
                receive_count = stored.receive_count,
                "Max receive count reached, moving to dead-letter queue"
            );
            self.dead_letter(id, stored, "max receive count exceeded")?;
        }

        let Some((id, mut stored)) = chosen else {
            return Ok(None);
        };

        stored.receive_count += 1;
        stored.receipt_handle = Uuid::new_v4().to_string();
        stored.visible_at_ms = now + self.options.visibility_timeout.as_millis() as u64;
        self.messages.insert(id.to_be_bytes(), stored.encode_to_vec())?;

        debug!(queue = %self.name, id, receive_count = stored.receive_count, "Message received");

        Ok(Some(QueueMessage {
            id,
            receipt_handle: stored.receipt_handle,
            receive_count: stored.receive_count,
            body: stored.body,
        }))
    }

    /// Load a message and check that the caller still owns the delivery
    fn owned(&self, message: &QueueMessage) -> Result<StoredMessage> {
        let stored = self
            .messages
            .get(message.id.to_be_bytes())?
            .ok_or(QueueError::MessageNotFound(message.id))?;
        let stored = StoredMessage::decode(&*stored)?;

        if stored.receipt_handle != message.receipt_handle {
            return Err(QueueError::StaleReceipt(message.id));
        }
        Ok(stored)
    }

    fn delete(&self, message: &QueueMessage) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.owned(message)?;
        self.messages.remove(message.id.to_be_bytes())?;
        debug!(queue = %self.name, id = message.id, "Message acknowledged");
        Ok(())
    }

    fn release(&self, message: &QueueMessage, nack: Nack) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = self.owned(message)?;

        match nack {
            Nack::Retry => {
                stored.visible_at_ms = now_ms();
                self.messages
                    .insert(message.id.to_be_bytes(), stored.encode_to_vec())?;
                debug!(queue = %self.name, id = message.id, "Message released for redelivery");
            }
            Nack::Reject(reason) => {
                self.dead_letter(message.id, stored, &reason)?;
            }
        }
        Ok(())
    }

    fn dead_letter(&self, id: u64, stored: StoredMessage, reason: &str) -> Result<()> {
        let record = DeadLetterRecord {
            message: Some(stored),
            reason: reason.to_string(),
            dead_lettered_at_ms: now_ms(),
        };

        let key = id.to_be_bytes();
        let mut batch = self.keyspace.batch();
        batch.insert(&self.dlq, key, record.encode_to_vec());
        batch.remove(&self.messages, key);
        batch.commit()?;

        info!(queue = %self.name, id, reason, "Message moved to dead-letter queue");
        Ok(())
    }

    /// List dead letters (for inspection)
    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut results = Vec::new();

        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let record = DeadLetterRecord::decode(&*value)?;
            let message = record.message.unwrap_or_default();

            results.push(DeadLetter {
                id: decode_id(&key),
                body: message.body,
                receive_count: message.receive_count,
                reason: record.reason,
                dead_lettered_at_ms: record.dead_lettered_at_ms,
            });
        }

        Ok(results)
    }

    /// Move every dead letter back onto the queue with a fresh receive count
    pub fn redrive_dead_letters(&self) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_ms();

        let mut parked = Vec::new();
        for item in self.dlq.iter() {
            let (key, value) = item?;
            parked.push((decode_id(&key), DeadLetterRecord::decode(&*value)?));
        }

        let mut batch = self.keyspace.batch();
        for (id, record) in &parked {
            let message = record.message.clone().unwrap_or_default();
            let revived = StoredMessage {
                body: message.body,
                receive_count: 0,
                visible_at_ms: now,
                receipt_handle: String::new(),
                enqueued_at_ms: message.enqueued_at_ms,
            };
            batch.insert(&self.messages, id.to_be_bytes(), revived.encode_to_vec());
            batch.remove(&self.dlq, id.to_be_bytes());
        }
        batch.commit()?;

        info!(queue = %self.name, count = parked.len(), "Dead letters redriven");
        Ok(parked.len())
    }

    fn count(partition: &PartitionHandle) -> Result<usize> {
        let mut count = 0;
        for item in partition.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for FjallQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, body: Vec<u8>) -> Result<u64> {
        self.enqueue(body)
    }

    async fn receive(&self) -> Result<Option<QueueMessage>> {
        self.take_next()
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<()> {
        self.delete(message)
    }

    async fn nack(&self, message: &QueueMessage, nack: Nack) -> Result<()> {
        self.release(message, nack)
    }

    async fn depth(&self) -> Result<usize> {
        Self::count(&self.messages)
    }

    async fn dead_letter_depth(&self) -> Result<usize> {
        Self::count(&self.dlq)
    }
}

fn decode_id(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().unwrap_or([0u8; 8]))
}

/// Current Unix timestamp in milliseconds
fn now_ms() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}
