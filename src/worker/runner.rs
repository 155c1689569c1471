//! Unit runner - processes individual queue messages

use super::http::FetchError;
use super::source::DataSource;
use crate::config::Config;
use crate::ingest::{WorkUnit, codec, storage_key};
use crate::observability::Metrics;
use crate::queue::{Nack, QueueMessage, WorkQueue};
use crate::storage::StorageClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-message behaviour knobs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Ack without fetching when the target object already exists
    pub skip_existing: bool,
    /// Pause before each upstream call
    pub throttle: Duration,
    pub write_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            skip_existing: config.storage.skip_existing,
            throttle: config.fetch.throttle.as_duration(),
            write_timeout: config.storage.write_timeout.as_duration(),
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The object at `key` is in place; the message can be deleted
    Ack { key: String, skipped: bool },
    Nack(Nack),
}

/// Turns a work unit message into one stored page
pub struct Worker {
    settings: WorkerSettings,
    source: Arc<dyn DataSource>,
    storage: StorageClient,
    metrics: Arc<Metrics>,
}

impl Worker {
    pub fn new(
        settings: WorkerSettings,
        source: Arc<dyn DataSource>,
        storage: StorageClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            settings,
            source,
            storage,
            metrics,
        }
    }

    /// Decide the fate of a message without touching the queue
    ///
    /// Only returns `Ack` once the object is durably written (or already
    /// present). Writes are full overwrites of a deterministic key, so a
    /// redelivered message reproduces the same object.
    pub async fn process(&self, message: &QueueMessage) -> Outcome {
        let unit = match WorkUnit::from_body(&message.body) {
            Ok(unit) => unit,
            Err(e) => {
                error!(message_id = message.id, error = %e, "Malformed work unit");
                self.metrics.unit_rejected();
                return Outcome::Nack(Nack::Reject(format!("malformed work unit: {e}")));
            }
        };

        let key = storage_key(&unit);
        debug!(
            endpoint = %unit.endpoint,
            date = %unit.date,
            page = unit.page,
            receive_count = message.receive_count,
            key,
            "Processing unit"
        );

        if self.settings.skip_existing {
            match self.storage.exists(&key).await {
                Ok(true) => {
                    info!(key, "Object exists, skipping fetch");
                    self.metrics.unit_skipped();
                    return Outcome::Ack { key, skipped: true };
                }
                Ok(false) => {}
                Err(e) => warn!(key, error = %e, "Existence check failed, fetching anyway"),
            }
        }

        if !self.settings.throttle.is_zero() {
            tokio::time::sleep(self.settings.throttle).await;
        }

        let result = match self.source.fetch(&unit).await {
            Ok(result) => result,
            Err(e) if e.is_transient() || matches!(e, FetchError::Exhausted { .. }) => {
                warn!(key, error = %e, "Fetch failed, leaving unit for redelivery");
                self.metrics.unit_retried();
                return Outcome::Nack(Nack::Retry);
            }
            Err(e) => {
                error!(key, error = %e, "Fetch failed permanently");
                self.metrics.unit_rejected();
                return Outcome::Nack(Nack::Reject(e.to_string()));
            }
        };

        let records = result.items.len();
        let bytes = match codec::encode(&result).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(key, error = %e, "Failed to encode page");
                self.metrics.unit_rejected();
                return Outcome::Nack(Nack::Reject(format!("encode failed: {e}")));
            }
        };

        match tokio::time::timeout(
            self.settings.write_timeout,
            self.storage.put_page(&key, bytes),
        )
        .await
        {
            Ok(Ok(upload)) => {
                info!(key, records, size = upload.size, "Unit stored");
                self.metrics.unit_written();
                Outcome::Ack {
                    key,
                    skipped: false,
                }
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "Write failed");
                self.metrics.write_failed();
                Outcome::Nack(Nack::Retry)
            }
            Err(_) => {
                warn!(
                    key,
                    timeout_ms = self.settings.write_timeout.as_millis() as u64,
                    "Write timed out"
                );
                self.metrics.write_failed();
                Outcome::Nack(Nack::Retry)
            }
        }
    }

    /// Process a message and settle it on its queue
    pub async fn handle(&self, queue: &dyn WorkQueue, message: QueueMessage) -> Outcome {
        let outcome = self.process(&message).await;

        let settled = match &outcome {
            Outcome::Ack { .. } => queue.acknowledge(&message).await,
            Outcome::Nack(nack) => queue.nack(&message, nack.clone()).await,
        };

        // A stale receipt means the message was redelivered meanwhile; the
        // write is idempotent so the next consumer settles it.
        if let Err(e) = settled {
            warn!(
                queue = queue.name(),
                message_id = message.id,
                error = %e,
                "Failed to settle message"
            );
        }

        outcome
    }
}
