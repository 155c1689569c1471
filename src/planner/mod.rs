//! Planner: fans a run date out into per-endpoint work units
//!
//! Every `(endpoint, page)` pair of the configured product becomes one
//! [`WorkUnit`] published to that endpoint's queue. Routes are resolved up
//! front so a misconfigured endpoint fails the run before anything is
//! published; after that a unit that cannot be published is retried a
//! bounded number of times, recorded as failed, and the run moves on.

use crate::config::PlannerConfig;
use crate::ingest::WorkUnit;
use crate::observability::Metrics;
use crate::queue::{QueueError, QueueRouter, WorkQueue};
use crate::worker::RetryPolicy;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Routing failed: {0}")]
    Route(#[from] QueueError),
}

/// Result of one planning run
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub run_date: NaiveDate,
    /// Units accepted by their queue
    pub planned: usize,
    pub per_endpoint: BTreeMap<String, usize>,
    /// Units that could not be published after all attempts
    pub failed: Vec<WorkUnit>,
}

pub struct Planner {
    config: PlannerConfig,
    router: QueueRouter,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
}

impl Planner {
    pub fn new(config: PlannerConfig, router: QueueRouter, metrics: Arc<Metrics>) -> Self {
        let backoff = config.publish_backoff.as_duration();
        let retry = RetryPolicy::builder()
            .max_attempts(config.publish_max_attempts.max(1))
            .base_delay(backoff)
            .max_delay(backoff.saturating_mul(8).max(Duration::from_millis(1)))
            .jitter(false)
            .build();

        Self {
            config,
            router,
            metrics,
            retry,
        }
    }

    /// Units for one run date, in endpoint then page order
    pub fn units(&self, run_date: NaiveDate) -> Vec<WorkUnit> {
        self.config
            .endpoints
            .iter()
            .flat_map(|endpoint| {
                (1..=self.config.pages_for(endpoint))
                    .map(move |page| WorkUnit::new(endpoint.clone(), run_date, page))
            })
            .collect()
    }

    pub async fn plan(&self, run_date: NaiveDate) -> Result<PlanSummary, PlanError> {
        let queues = self
            .config
            .endpoints
            .iter()
            .map(|endpoint| {
                self.router
                    .route(endpoint)
                    .map(|queue| (endpoint.as_str(), queue))
            })
            .collect::<Result<BTreeMap<_, _>, QueueError>>()?;

        let mut summary = PlanSummary {
            run_date,
            planned: 0,
            per_endpoint: BTreeMap::new(),
            failed: Vec::new(),
        };

        for unit in self.units(run_date) {
            let queue = &queues[unit.endpoint.as_str()];

            match self.publish(queue.as_ref(), &unit).await {
                Ok(id) => {
                    debug!(queue = queue.name(), id, page = unit.page, "Unit published");
                    self.metrics.unit_planned();
                    summary.planned += 1;
                    *summary
                        .per_endpoint
                        .entry(unit.endpoint.clone())
                        .or_default() += 1;
                }
                Err(e) => {
                    error!(
                        endpoint = %unit.endpoint,
                        page = unit.page,
                        error = %e,
                        "Giving up on unit"
                    );
                    self.metrics.publish_failed();
                    summary.failed.push(unit);
                }
            }
        }

        info!(
            %run_date,
            planned = summary.planned,
            failed = summary.failed.len(),
            "Plan complete"
        );
        Ok(summary)
    }

    async fn publish(&self, queue: &dyn WorkQueue, unit: &WorkUnit) -> Result<u64, QueueError> {
        let body = unit
            .to_body()
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match queue.publish(body.clone()).await {
                Ok(id) => return Ok(id),
                Err(e) if attempts >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    let backoff = self.retry.delay_for(attempts);
                    warn!(
                        queue = queue.name(),
                        page = unit.page,
                        attempts,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HumanDuration;
    use crate::queue::{FjallQueue, Nack, QueueMessage, QueueOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn config(endpoints: &[&str]) -> PlannerConfig {
        PlannerConfig {
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            publish_backoff: HumanDuration::from_millis(1),
            ..PlannerConfig::default()
        }
    }

    /// Rejects the first `failures` publishes and every publish of `poison_page`
    struct FlakyQueue {
        failures: u32,
        poison_page: Option<u32>,
        calls: AtomicU32,
        published: AtomicU32,
    }

    impl FlakyQueue {
        fn new(failures: u32, poison_page: Option<u32>) -> Self {
            Self {
                failures,
                poison_page,
                calls: AtomicU32::new(0),
                published: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkQueue for FlakyQueue {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn publish(&self, body: Vec<u8>) -> crate::queue::Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let unit = WorkUnit::from_body(&body).unwrap();
            if call < self.failures || Some(unit.page) == self.poison_page {
                return Err(QueueError::PublishFailed("unavailable".to_string()));
            }
            Ok(u64::from(self.published.fetch_add(1, Ordering::SeqCst)))
        }

        async fn receive(&self) -> crate::queue::Result<Option<QueueMessage>> {
            Ok(None)
        }

        async fn acknowledge(&self, _message: &QueueMessage) -> crate::queue::Result<()> {
            Ok(())
        }

        async fn nack(&self, _message: &QueueMessage, _nack: Nack) -> crate::queue::Result<()> {
            Ok(())
        }

        async fn depth(&self) -> crate::queue::Result<usize> {
            Ok(self.published.load(Ordering::SeqCst) as usize)
        }

        async fn dead_letter_depth(&self) -> crate::queue::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_plan_fans_out_per_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config = PlannerConfig::default();
        let router =
            QueueRouter::open(temp_dir.path(), &config.endpoints, QueueOptions::default()).unwrap();
        let metrics = Arc::new(Metrics::new());
        let planner = Planner::new(config, router.clone(), metrics.clone());

        let summary = planner.plan(date()).await.unwrap();

        assert_eq!(summary.planned, 40);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.per_endpoint.len(), 4);
        for (endpoint, queue) in router.iter() {
            assert_eq!(summary.per_endpoint[endpoint], 10);
            assert_eq!(queue.depth().await.unwrap(), 10);
        }
        assert_eq!(metrics.snapshot().units_planned, 40);
    }

    #[tokio::test]
    async fn test_messages_carry_their_unit() {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(
            FjallQueue::open(temp_dir.path(), "api-a", QueueOptions::default()).unwrap(),
        );
        let mut router = QueueRouter::new();
        router.register("api-a", queue.clone());

        let planner = Planner::new(config(&["api-a"]), router, Arc::new(Metrics::new()));
        planner.plan(date()).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert_eq!(
            WorkUnit::from_body(&first.body).unwrap(),
            WorkUnit::new("api-a", date(), 1)
        );
    }

    #[test]
    fn test_page_override() {
        let mut config = config(&["api-a", "api-b"]);
        config.pages.insert("api-b".to_string(), 3);
        let planner = Planner::new(config, QueueRouter::new(), Arc::new(Metrics::new()));

        let units = planner.units(date());
        assert_eq!(units.len(), 13);
        assert_eq!(units.last(), Some(&WorkUnit::new("api-b", date(), 3)));
    }

    #[tokio::test]
    async fn test_transient_publish_failure_is_retried() {
        let queue = Arc::new(FlakyQueue::new(2, None));
        let mut router = QueueRouter::new();
        router.register("api-a", queue.clone());

        let planner = Planner::new(config(&["api-a"]), router, Arc::new(Metrics::new()));
        let summary = planner.plan(date()).await.unwrap();

        assert_eq!(summary.planned, 10);
        assert!(summary.failed.is_empty());
        assert_eq!(queue.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_failed_unit_does_not_abort_run() {
        let poisoned = Arc::new(FlakyQueue::new(0, Some(4)));
        let mut router = QueueRouter::new();
        router.register("api-a", poisoned.clone());
        router.register("api-b", Arc::new(FlakyQueue::new(0, None)));

        let metrics = Arc::new(Metrics::new());
        let planner = Planner::new(config(&["api-a", "api-b"]), router, metrics.clone());
        let summary = planner.plan(date()).await.unwrap();

        assert_eq!(summary.planned, 19);
        assert_eq!(summary.failed, vec![WorkUnit::new("api-a", date(), 4)]);
        assert_eq!(summary.per_endpoint["api-a"], 9);
        assert_eq!(summary.per_endpoint["api-b"], 10);
        // 9 good pages plus 3 attempts at the poisoned one
        assert_eq!(poisoned.calls.load(Ordering::SeqCst), 12);
        assert_eq!(metrics.snapshot().publish_failures, 1);
    }

    #[tokio::test]
    async fn test_missing_route_fails_before_publishing() {
        let queue = Arc::new(FlakyQueue::new(0, None));
        let mut router = QueueRouter::new();
        router.register("api-a", queue.clone());

        let planner = Planner::new(config(&["api-a", "api-z"]), router, Arc::new(Metrics::new()));

        assert!(matches!(
            planner.plan(date()).await,
            Err(PlanError::Route(QueueError::NoRoute(name))) if name == "api-z"
        ));
        assert_eq!(queue.calls.load(Ordering::SeqCst), 0);
    }
}
