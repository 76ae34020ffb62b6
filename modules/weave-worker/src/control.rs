//! Internal control port: `GET /health`, `POST /drain`,
//! `GET /metrics`, `GET /status`. Built with `axum`. Meant to be bound
//! to loopback or an internal service network only — binding choice is
//! the caller's responsibility (`serve`, below, takes the listener
//! address verbatim).

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::metrics::{STATUS_DRAINING, STATUS_NOT_RUNNING, STATUS_RUNNING};
use crate::runtime::WorkerRuntime;

pub fn build_router(runtime: Arc<WorkerRuntime>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/drain", post(drain))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(runtime)
}

/// `GET /health` → `OK` / `DRAINING` / `NOT_RUNNING`, HTTP 200 for the
/// first two and 503 once the worker has actually stopped.
async fn health(axum::extract::State(runtime): axum::extract::State<Arc<WorkerRuntime>>) -> impl IntoResponse {
    match runtime.status() {
        STATUS_RUNNING => (StatusCode::OK, "OK"),
        STATUS_DRAINING => (StatusCode::OK, "DRAINING"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "NOT_RUNNING"),
    }
}

/// `POST /drain`: stop polling new work, let in-flight activities finish.
async fn drain(axum::extract::State(runtime): axum::extract::State<Arc<WorkerRuntime>>) -> impl IntoResponse {
    runtime.drain();
    (StatusCode::ACCEPTED, "draining")
}

/// `GET /metrics`: Prometheus text exposition format 0.0.4.
async fn metrics(axum::extract::State(runtime): axum::extract::State<Arc<WorkerRuntime>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        runtime.metrics.encode(),
    )
}

#[derive(Serialize)]
struct StatusBody {
    worker_id: String,
    status: &'static str,
    uptime_seconds: u64,
}

/// `GET /status`: JSON detail, for operator tooling that doesn't want to
/// parse the Prometheus text format.
async fn status(axum::extract::State(runtime): axum::extract::State<Arc<WorkerRuntime>>) -> impl IntoResponse {
    let status = match runtime.status() {
        STATUS_RUNNING => "running",
        STATUS_DRAINING => "draining",
        _ => "not_running",
    };
    Json(StatusBody {
        worker_id: runtime.worker_id().to_string(),
        status,
        uptime_seconds: runtime.metrics.uptime_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::queue::InProcessActivityQueue;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use weave_multiplex::InMemorySlotRepository;
    use weave_orchestrator::{InMemoryDedupIndexFactory, InMemorySyncRepository};

    async fn test_runtime() -> Arc<WorkerRuntime> {
        let repo = Arc::new(InMemorySyncRepository::new());
        let slot_repo = Arc::new(InMemorySlotRepository::new());
        struct NoDriverFactory;
        #[async_trait::async_trait]
        impl weave_orchestrator::DriverFactory for NoDriverFactory {
            async fn build_driver(&self, _sync: &weave_types::sync::Sync) -> weave_orchestrator::Result<Arc<dyn weave_sources::SourceDriver>> {
                unreachable!("no activities dispatched in this test")
            }
        }
        struct NoDestinationFactory;
        #[async_trait::async_trait]
        impl weave_orchestrator::DestinationFactory for NoDestinationFactory {
            async fn build_destination(
                &self,
                _slot: &weave_types::sync::DestinationSlot,
                _collection: &weave_types::sync::Collection,
            ) -> weave_orchestrator::Result<Arc<dyn weave_destinations::Destination>> {
                unreachable!("no activities dispatched in this test")
            }
        }
        struct NoTokenProviderFactory;
        #[async_trait::async_trait]
        impl weave_orchestrator::TokenProviderFactory for NoTokenProviderFactory {
            async fn build_token_provider(
                &self,
                _sync: &weave_types::sync::Sync,
            ) -> weave_orchestrator::Result<Arc<dyn weave_pipeline::AccessTokenProvider>> {
                unreachable!("no activities dispatched in this test")
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(weave_orchestrator::SyncOrchestrator::new(
            repo.clone(),
            slot_repo,
            Arc::new(NoDriverFactory),
            Arc::new(NoDestinationFactory),
            Arc::new(NoTokenProviderFactory),
            Arc::new(InMemoryDedupIndexFactory::new()),
            Arc::new(weave_text::TextBuilder::new(Box::new(weave_text::NoopOcrAdapter))),
            weave_storage::backend_from_url("memory://").unwrap(),
            tmp.path().to_path_buf(),
        ));
        let queue = InProcessActivityQueue::new();
        let mut config = WorkerConfig::from_env();
        config.worker_id = "ctrl-test".to_string();
        WorkerRuntime::new(config, orchestrator, repo, queue)
    }

    #[tokio::test]
    async fn health_reports_ok_then_not_running_after_drain_completes() {
        let runtime = test_runtime().await;
        let router = build_router(runtime.clone());

        let resp = router.clone().oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let run_handle = tokio::spawn(runtime.clone().run());
        let resp = router.clone().oneshot(Request::builder().method("POST").uri("/drain").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        tokio::time::timeout(std::time::Duration::from_secs(5), run_handle).await.unwrap().unwrap();
        let resp = router.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let runtime = test_runtime().await;
        let router = build_router(runtime);
        let resp = router.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(axum::http::header::CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
