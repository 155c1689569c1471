//! Queue consumers with bounded concurrency

use super::runner::{Outcome, Worker};
use crate::queue::{Nack, QueueError, WorkQueue};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Tally of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub received: usize,
    pub written: usize,
    pub skipped: usize,
    pub retried: usize,
    pub rejected: usize,
}

impl DrainSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Ack { skipped: true, .. } => self.skipped += 1,
            Outcome::Ack { skipped: false, .. } => self.written += 1,
            Outcome::Nack(Nack::Retry) => self.retried += 1,
            Outcome::Nack(Nack::Reject(_)) => self.rejected += 1,
        }
    }

    pub fn merge(&mut self, other: &DrainSummary) {
        self.received += other.received;
        self.written += other.written;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.rejected += other.rejected;
    }
}

/// Consume until the queue has nothing visible and nothing in flight
///
/// Retried messages come back around until they succeed or the queue
/// dead-letters them at its receive limit, so this always terminates.
pub async fn drain(
    worker: Arc<Worker>,
    queue: Arc<dyn WorkQueue>,
    concurrency: usize,
) -> Result<DrainSummary, QueueError> {
    let concurrency = concurrency.max(1);
    let mut tasks = JoinSet::new();
    let mut summary = DrainSummary::default();
    let mut empty = false;

    loop {
        while !empty && tasks.len() < concurrency {
            match queue.receive().await? {
                Some(message) => {
                    summary.received += 1;
                    let worker = worker.clone();
                    let queue = queue.clone();
                    tasks.spawn(async move { worker.handle(queue.as_ref(), message).await });
                }
                None => empty = true,
            }
        }

        match tasks.join_next().await {
            Some(Ok(outcome)) => summary.record(&outcome),
            Some(Err(e)) => error!(queue = queue.name(), error = %e, "Worker task failed"),
            None => break,
        }
        // A settled nack may have made a message visible again
        empty = false;
    }

    info!(
        queue = queue.name(),
        received = summary.received,
        written = summary.written,
        skipped = summary.skipped,
        retried = summary.retried,
        rejected = summary.rejected,
        "Queue drained"
    );
    Ok(summary)
}

/// Long-running consumer; polls every `poll_interval` while idle and stops
/// taking new messages once `shutdown` flips to true
pub async fn run(
    worker: Arc<Worker>,
    queue: Arc<dyn WorkQueue>,
    concurrency: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let concurrency = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX);
    let permits = Arc::new(Semaphore::new(concurrency as usize));
    info!(queue = queue.name(), concurrency, "Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let idle = match queue.receive().await {
            Ok(Some(message)) => {
                let worker = worker.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.handle(queue.as_ref(), message).await;
                });
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(queue = queue.name(), error = %e, "Receive failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Wait for in-flight units before returning
    if let Err(e) = permits.acquire_many(concurrency).await {
        warn!(queue = queue.name(), error = %e, "Failed to wait for in-flight units");
    }
    info!(queue = queue.name(), "Consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::WorkUnit;
    use crate::observability::Metrics;
    use crate::queue::{FjallQueue, QueueOptions};
    use crate::storage::StorageClient;
    use crate::worker::runner::WorkerSettings;
    use crate::ingest::FetchResult;
    use crate::worker::http;
    use crate::worker::source::{DataSource, MockSource};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Mock source that holds every fetch for `delay`
    struct SlowSource {
        started: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl DataSource for SlowSource {
        async fn fetch(&self, unit: &WorkUnit) -> http::Result<FetchResult> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            MockSource::default().fetch(unit).await
        }
    }

    fn worker(storage: StorageClient) -> Arc<Worker> {
        let settings = WorkerSettings {
            skip_existing: true,
            throttle: Duration::ZERO,
            write_timeout: Duration::from_secs(5),
        };
        Arc::new(Worker::new(
            settings,
            Arc::new(MockSource::default()),
            storage,
            Arc::new(Metrics::new()),
        ))
    }

    async fn queue_with_units(temp_dir: &TempDir, pages: u32) -> Arc<dyn WorkQueue> {
        let queue = FjallQueue::open(temp_dir.path(), "api-a", QueueOptions::default()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        for page in 1..=pages {
            let body = WorkUnit::new("api-a", date, page).to_body().unwrap();
            queue.publish(body).await.unwrap();
        }
        Arc::new(queue)
    }

    #[tokio::test]
    async fn test_drain_processes_everything() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_with_units(&temp_dir, 6).await;
        let storage = StorageClient::in_memory();

        let summary = drain(worker(storage.clone()), queue.clone(), 3).await.unwrap();

        assert_eq!(summary.received, 6);
        assert_eq!(summary.written, 6);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(
            storage
                .list_keys("raw/source=api-a/ingestion_date=2024-01-15")
                .await
                .unwrap()
                .len(),
            6
        );
    }

    #[tokio::test]
    async fn test_drain_dead_letters_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_with_units(&temp_dir, 1).await;
        queue.publish(b"garbage".to_vec()).await.unwrap();

        let summary = drain(worker(StorageClient::in_memory()), queue.clone(), 2)
            .await
            .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(queue.dead_letter_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_with_units(&temp_dir, 3).await;
        let storage = StorageClient::in_memory();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            worker(storage.clone()),
            queue.clone(),
            2,
            Duration::from_millis(10),
            rx,
        ));

        for _ in 0..200 {
            if queue.depth().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(
            storage
                .list_keys("raw/source=api-a/ingestion_date=2024-01-15")
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_run_waits_for_in_flight_units_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_with_units(&temp_dir, 2).await;
        let storage = StorageClient::in_memory();
        let started = Arc::new(AtomicUsize::new(0));
        let source = SlowSource {
            started: started.clone(),
            delay: Duration::from_millis(300),
        };
        let settings = WorkerSettings {
            skip_existing: true,
            throttle: Duration::ZERO,
            write_timeout: Duration::from_secs(5),
        };
        let worker = Arc::new(Worker::new(
            settings,
            Arc::new(source),
            storage.clone(),
            Arc::new(Metrics::new()),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run(worker, queue.clone(), 2, Duration::from_millis(10), rx));

        for _ in 0..200 {
            if started.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(started.load(Ordering::SeqCst), 2);

        // Both fetches are still sleeping when shutdown is requested
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(
            storage
                .list_keys("raw/source=api-a/ingestion_date=2024-01-15")
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
