use crate::observability::{Metrics, MetricsSnapshot};
use crate::queue::{QueueError, QueueRouter, WorkQueue};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub queues: QueueRouter,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub dead_letters: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsReport {
    pub counters: MetricsSnapshot,
    pub queues: BTreeMap<String, QueueStats>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn run(
    address: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AnyError> {
    let listener = TcpListener::bind(address).await?;
    info!(%address, "ingestbox server listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics(State(state): State<AppState>) -> Response {
    let mut queues = BTreeMap::new();

    for (endpoint, queue) in state.queues.iter() {
        match queue_stats(queue.as_ref()).await {
            Ok(stats) => {
                queues.insert(endpoint.to_string(), stats);
            }
            Err(e) => {
                error!(queue = endpoint, error = %e, "Failed to read queue depth");
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        }
    }

    Json(MetricsReport {
        counters: state.metrics.snapshot(),
        queues,
    })
    .into_response()
}

async fn queue_stats(queue: &dyn WorkQueue) -> Result<QueueStats, QueueError> {
    Ok(QueueStats {
        depth: queue.depth().await?,
        dead_letters: queue.dead_letter_depth().await?,
    })
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
