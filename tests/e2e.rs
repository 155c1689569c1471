//! End-to-end pipeline tests
//!
//! Planner → Fjall queues → worker → in-memory blob store, with either the
//! mock source or a local axum server standing in for the upstream APIs.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use ingestbox::config::{FetchConfig, FetchMode, HumanDuration, PlannerConfig};
use ingestbox::ingest::{WorkUnit, codec, storage_key};
use ingestbox::observability::Metrics;
use ingestbox::planner::Planner;
use ingestbox::queue::{FjallQueue, Nack, QueueOptions, QueueRouter, WorkQueue};
use ingestbox::storage::StorageClient;
use ingestbox::worker::{self, HttpSource, MockSource, Outcome, Worker, WorkerSettings};

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn settings() -> WorkerSettings {
    WorkerSettings {
        skip_existing: true,
        throttle: Duration::ZERO,
        write_timeout: Duration::from_secs(5),
    }
}

fn mock_worker(storage: StorageClient, metrics: Arc<Metrics>) -> Arc<Worker> {
    Arc::new(Worker::new(
        settings(),
        Arc::new(MockSource::default()),
        storage,
        metrics,
    ))
}

#[derive(Deserialize)]
struct PageQuery {
    date: String,
    page: u32,
}

/// Upstream with per-endpoint behaviour:
/// - `/ok` returns `{"items": [...]}` echoing the query
/// - `/flaky` always answers 500
/// - `/gone` always answers 404
async fn start_mock_upstream() -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));

    let app = Router::new()
        .route(
            "/{kind}",
            get(
                |State(hits): State<Arc<AtomicU32>>,
                 Path(kind): Path<String>,
                 Query(query): Query<PageQuery>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    match kind.as_str() {
                        "ok" => Ok(Json(json!({
                            "items": [
                                {"date": query.date, "page": query.page, "n": 0},
                                {"date": query.date, "page": query.page, "n": 1},
                            ]
                        }))),
                        "flaky" => Err(StatusCode::INTERNAL_SERVER_ERROR),
                        _ => Err(StatusCode::NOT_FOUND),
                    }
                },
            ),
        )
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), hits)
}

fn real_worker(base: &str, storage: StorageClient, metrics: Arc<Metrics>) -> Arc<Worker> {
    let endpoint_urls = BTreeMap::from([
        ("api-ok".to_string(), format!("{base}/ok")),
        ("api-flaky".to_string(), format!("{base}/flaky")),
        ("api-gone".to_string(), format!("{base}/gone")),
    ]);
    let config = FetchConfig {
        mode: FetchMode::Real,
        endpoint_urls,
        max_attempts: 3,
        base_backoff: HumanDuration::from_millis(5),
        max_backoff: HumanDuration::from_millis(20),
        ..FetchConfig::default()
    };

    let source = HttpSource::new(&config, metrics.clone()).expect("valid upstream config");
    Arc::new(Worker::new(settings(), Arc::new(source), storage, metrics))
}

fn single_queue(temp_dir: &TempDir, name: &str, max_receive_count: u32) -> Arc<FjallQueue> {
    let options = QueueOptions {
        max_receive_count,
        ..QueueOptions::default()
    };
    Arc::new(FjallQueue::open(temp_dir.path(), name, options).expect("open queue"))
}

#[tokio::test]
async fn test_mock_unit_lands_at_expected_key() {
    let temp_dir = TempDir::new().unwrap();
    let queue = single_queue(&temp_dir, "api-a", 5);
    let storage = StorageClient::in_memory();
    let worker = mock_worker(storage.clone(), Arc::new(Metrics::new()));

    let unit = WorkUnit::new("api-a", run_date(), 3);
    queue.publish(unit.to_body().unwrap()).await.unwrap();

    let message = queue.receive().await.unwrap().expect("message");
    let outcome = worker.handle(queue.as_ref(), message).await;

    let key = "raw/source=api-a/ingestion_date=2024-01-15/page=000003.json.gz";
    assert_eq!(storage_key(&unit), key);
    assert_eq!(
        outcome,
        Outcome::Ack {
            key: key.to_string(),
            skipped: false
        }
    );
    assert_eq!(queue.depth().await.unwrap(), 0);

    let page = codec::decode(&storage.download(key).await.unwrap())
        .await
        .unwrap();
    assert_eq!(page.endpoint, "api-a");
    assert_eq!(page.date, run_date());
    assert_eq!(page.page, 3);
    assert_eq!(page.items.len(), 5);
    for item in &page.items {
        let fields: Vec<&str> = item
            .as_object()
            .expect("item is an object")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(fields, ["id", "value"]);
    }
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let queue = single_queue(&temp_dir, "api-a", 5);
    let storage = StorageClient::in_memory();
    let metrics = Arc::new(Metrics::new());
    let worker = mock_worker(storage.clone(), metrics.clone());

    let body = WorkUnit::new("api-a", run_date(), 1).to_body().unwrap();
    queue.publish(body.clone()).await.unwrap();
    queue.publish(body).await.unwrap();

    let summary = worker::drain(worker, queue.clone(), 2).await.unwrap();

    assert_eq!(summary.received, 2);
    assert_eq!(summary.written + summary.skipped, 2);
    assert_eq!(
        storage
            .list_keys("raw/source=api-a/ingestion_date=2024-01-15")
            .await
            .unwrap(),
        vec!["raw/source=api-a/ingestion_date=2024-01-15/page=000001.json.gz"]
    );
}

#[tokio::test]
async fn test_plan_then_drain_everything() {
    let temp_dir = TempDir::new().unwrap();
    let config = PlannerConfig::default();
    let queues = QueueRouter::open(temp_dir.path(), &config.endpoints, QueueOptions::default())
        .unwrap();
    let metrics = Arc::new(Metrics::new());
    let storage = StorageClient::in_memory();

    let planner = Planner::new(config.clone(), queues.clone(), metrics.clone());
    let plan = planner.plan(run_date()).await.unwrap();
    assert_eq!(plan.planned, 40);

    let worker = mock_worker(storage.clone(), metrics.clone());
    for (_, queue) in queues.iter() {
        let summary = worker::drain(worker.clone(), queue.clone(), 4).await.unwrap();
        assert_eq!(summary.written, 10);
    }

    for endpoint in &config.endpoints {
        let prefix = format!("raw/source={endpoint}/ingestion_date=2024-01-15");
        assert_eq!(storage.list_keys(&prefix).await.unwrap().len(), 10);
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.units_planned, 40);
    assert_eq!(snapshot.units_written, 40);

    // A second plan for the same date is absorbed by skip-if-exists
    planner.plan(run_date()).await.unwrap();
    for (_, queue) in queues.iter() {
        let summary = worker::drain(worker.clone(), queue.clone(), 4).await.unwrap();
        assert_eq!(summary.skipped, 10);
    }
    assert_eq!(metrics.snapshot().units_written, 40);
}

#[tokio::test]
async fn test_real_fetch_passes_date_and_page() {
    let (base, _hits) = start_mock_upstream().await;
    let temp_dir = TempDir::new().unwrap();
    let queue = single_queue(&temp_dir, "api-ok", 5);
    let storage = StorageClient::in_memory();
    let worker = real_worker(&base, storage.clone(), Arc::new(Metrics::new()));

    let unit = WorkUnit::new("api-ok", run_date(), 7);
    queue.publish(unit.to_body().unwrap()).await.unwrap();
    let summary = worker::drain(worker, queue.clone(), 1).await.unwrap();
    assert_eq!(summary.written, 1);

    let page = codec::decode(&storage.download(&storage_key(&unit)).await.unwrap())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0]["date"], "2024-01-15");
    assert_eq!(page.items[1]["page"], 7);
}

#[tokio::test]
async fn test_server_errors_retry_then_dead_letter() {
    let (base, hits) = start_mock_upstream().await;
    let temp_dir = TempDir::new().unwrap();
    let queue = single_queue(&temp_dir, "api-flaky", 2);
    let storage = StorageClient::in_memory();
    let metrics = Arc::new(Metrics::new());
    let worker = real_worker(&base, storage.clone(), metrics.clone());

    let unit = WorkUnit::new("api-flaky", run_date(), 1);
    queue.publish(unit.to_body().unwrap()).await.unwrap();

    let summary = worker::drain(worker, queue.clone(), 1).await.unwrap();

    // Two deliveries of three attempts each; the queue then parks the unit
    assert_eq!(summary.retried, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 6);
    assert_eq!(metrics.snapshot().fetch_retries, 4);
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert_eq!(queue.dead_letter_depth().await.unwrap(), 1);
    assert!(!storage.exists(&storage_key(&unit)).await.unwrap());
}

#[tokio::test]
async fn test_not_found_is_never_retried() {
    let (base, hits) = start_mock_upstream().await;
    let temp_dir = TempDir::new().unwrap();
    let queue = single_queue(&temp_dir, "api-gone", 5);
    let worker = real_worker(&base, StorageClient::in_memory(), Arc::new(Metrics::new()));

    let unit = WorkUnit::new("api-gone", run_date(), 1);
    queue.publish(unit.to_body().unwrap()).await.unwrap();

    let message = queue.receive().await.unwrap().unwrap();
    let outcome = worker.handle(queue.as_ref(), message).await;

    assert!(matches!(
        outcome,
        Outcome::Nack(Nack::Reject(ref reason)) if reason.contains("404")
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(queue.dead_letter_depth().await.unwrap(), 1);

    let parked = queue.list_dead_letters(10).unwrap();
    assert_eq!(WorkUnit::from_body(&parked[0].body).unwrap(), unit);
}

#[tokio::test]
async fn test_redrive_after_fix_completes_unit() {
    let temp_dir = TempDir::new().unwrap();
    let queue = single_queue(&temp_dir, "api-a", 5);
    let storage = StorageClient::in_memory();

    let unit = WorkUnit::new("api-a", run_date(), 2);
    queue.publish(unit.to_body().unwrap()).await.unwrap();
    let message = queue.receive().await.unwrap().unwrap();
    queue
        .nack(&message, Nack::Reject("upstream outage".to_string()))
        .await
        .unwrap();
    assert_eq!(queue.dead_letter_depth().await.unwrap(), 1);

    assert_eq!(queue.redrive_dead_letters().unwrap(), 1);
    let worker = mock_worker(storage.clone(), Arc::new(Metrics::new()));
    let summary = worker::drain(worker, queue.clone(), 1).await.unwrap();

    assert_eq!(summary.written, 1);
    assert_eq!(queue.dead_letter_depth().await.unwrap(), 0);
    assert!(storage.exists(&storage_key(&unit)).await.unwrap());
}
