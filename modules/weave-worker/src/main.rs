//! `weave-worker`: the process entrypoint. Polls the
//! activity queue, runs sync jobs through the orchestrator, and serves
//! `/health`, `/drain`, `/metrics`, `/status` on an internal port.
//!
//! Concrete `DriverFactory`/`DestinationFactory`/`TokenProviderFactory`
//! wiring (reading real `source_connection`/credentials rows) is a
//! deployment-specific composition root outside this crate's scope.
//! This binary wires the in-memory defaults —
//! the same ones `weave-orchestrator`'s and `weave-worker`'s own test
//! suites use — so the process is runnable standalone and a deployment
//! swaps the factories for DB-backed ones without touching the poll
//! loop or control surface below.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use weave_multiplex::InMemorySlotRepository;
use weave_orchestrator::{InMemoryDedupIndexFactory, InMemorySyncRepository, SyncOrchestrator};
use weave_text::{NoopOcrAdapter, TextBuilder};
use weave_worker::{InProcessActivityQueue, WorkerConfig, WorkerRuntime};

#[derive(Parser)]
#[command(name = "weave-worker", about = "Sync execution engine worker runtime")]
struct Cli {
    /// Base directory for the raw-data archive and per-job temp files.
    #[arg(long, default_value = "./weave-data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();
    tracing::info!(worker_id = %config.worker_id, metrics_port = config.metrics_port, "weave-worker starting");

    std::fs::create_dir_all(&cli.data_dir)?;
    let raw_root = weave_storage::backend_from_url(&format!("file://{}", cli.data_dir.join("raw").display()))?;
    let tmp_root = cli.data_dir.join("tmp");

    let repo = Arc::new(InMemorySyncRepository::new());
    let slot_repo = Arc::new(InMemorySlotRepository::new());
    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            repo.clone(),
            slot_repo,
            Arc::new(unwired::NeverDriverFactory),
            Arc::new(unwired::NeverDestinationFactory),
            Arc::new(unwired::NeverTokenProviderFactory),
            Arc::new(InMemoryDedupIndexFactory::new()),
            Arc::new(TextBuilder::new(Box::new(NoopOcrAdapter))),
            raw_root,
            tmp_root,
        )
        .with_worker_concurrency(config.worker_concurrency),
    );

    let queue = InProcessActivityQueue::new();
    let runtime = WorkerRuntime::new(config.clone(), orchestrator, repo, queue.clone());
    runtime.spawn_stuck_job_sweeper();

    let control_router = weave_worker::control::build_router(runtime.clone());
    let metrics_port = config.metrics_port;
    let control_handle = if metrics_port != 0 {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", metrics_port)).await?;
        tracing::info!(port = metrics_port, "control surface listening");
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, control_router).await {
                tracing::error!(error = %e, "control server exited");
            }
        }))
    } else {
        None
    };

    let mut poll_handle = tokio::spawn(runtime.clone().run());

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining");
            runtime.drain();
        }
        join_result = &mut poll_handle => {
            join_result?;
        }
    }

    let shutdown_timeout = config.graceful_shutdown_timeout;
    if !poll_handle.is_finished() {
        match tokio::time::timeout(shutdown_timeout, poll_handle).await {
            Ok(join_result) => join_result?,
            Err(_) => tracing::warn!("graceful shutdown timeout elapsed; exiting with activities possibly still in flight"),
        }
    }
    if let Some(handle) = control_handle {
        handle.abort();
    }
    Ok(())
}

/// Resolves once SIGTERM or Ctrl-C is observed. SIGTERM (or `/drain`)
/// must not cause in-flight sync activities to be cancelled — only the
/// poller stops.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Placeholder factories for the standalone binary's composition root.
/// A real deployment injects `DriverFactory`/`DestinationFactory`/
/// `TokenProviderFactory` implementations backed by the out-of-scope
/// `source_connection`/destination-credential store
/// instead of linking these; nothing enqueues a `RunSync` activity
/// against a sync these can't build, so they're never actually called
/// outside of a misconfigured deployment.
mod unwired {
    use async_trait::async_trait;
    use std::sync::Arc;
    use weave_destinations::Destination;
    use weave_orchestrator::{DestinationFactory, DriverFactory, Result, TokenProviderFactory};
    use weave_pipeline::AccessTokenProvider;
    use weave_sources::SourceDriver;
    use weave_types::sync::{Collection, DestinationSlot, Sync};

    pub struct NeverDriverFactory;
    #[async_trait]
    impl DriverFactory for NeverDriverFactory {
        async fn build_driver(&self, sync: &Sync) -> Result<Arc<dyn SourceDriver>> {
            Err(weave_orchestrator::OrchestratorError::Other(anyhow::anyhow!(
                "no driver factory configured for source {}; wire a deployment-specific DriverFactory",
                sync.source_short_name
            )))
        }
    }

    pub struct NeverDestinationFactory;
    #[async_trait]
    impl DestinationFactory for NeverDestinationFactory {
        async fn build_destination(&self, slot: &DestinationSlot, _collection: &Collection) -> Result<Arc<dyn Destination>> {
            Err(weave_orchestrator::OrchestratorError::Other(anyhow::anyhow!(
                "no destination factory configured for destination type {}; wire a deployment-specific DestinationFactory",
                slot.destination_type
            )))
        }
    }

    pub struct NeverTokenProviderFactory;
    #[async_trait]
    impl TokenProviderFactory for NeverTokenProviderFactory {
        async fn build_token_provider(&self, sync: &Sync) -> Result<Arc<dyn AccessTokenProvider>> {
            Err(weave_orchestrator::OrchestratorError::Other(anyhow::anyhow!(
                "no token provider factory configured for source {}; wire a deployment-specific TokenProviderFactory",
                sync.source_short_name
            )))
        }
    }
}
