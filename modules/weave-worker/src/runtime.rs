//! Worker runtime: a long-lived process that polls the
//! activity queue and hands work to the orchestrator, while exposing
//! the health/drain/metrics surface over HTTP (`control.rs`).
//!
//! A `draining` flag is checked on the poll loop, and shutdown awaits
//! in-flight activities before exiting — the same semaphore-bounded
//! concurrency idiom used elsewhere for bounding "N concurrent
//! long-running tasks", generalized here to "N concurrent
//! workflow/activity polls".

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weave_orchestrator::{SyncOrchestrator, SyncRepository};
use weave_types::ids::SyncId;

use crate::config::WorkerConfig;
use crate::metrics::{WorkerMetrics, STATUS_DRAINING, STATUS_NOT_RUNNING, STATUS_RUNNING};
use crate::queue::{Activity, ActivityQueue, Dispatched};

/// How often the poll loop rechecks the drain flag between queue polls
/// (the queue's own `poll()` can block indefinitely, so a short timeout
/// keeps drain latency bounded without busy-looping).
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(200);

pub struct WorkerRuntime {
    config: WorkerConfig,
    orchestrator: Arc<SyncOrchestrator>,
    repo: Arc<dyn SyncRepository>,
    queue: Arc<dyn ActivityQueue>,
    pub metrics: Arc<WorkerMetrics>,
    status: AtomicI64,
}

impl WorkerRuntime {
    pub fn new(
        config: WorkerConfig,
        orchestrator: Arc<SyncOrchestrator>,
        repo: Arc<dyn SyncRepository>,
        queue: Arc<dyn ActivityQueue>,
    ) -> Arc<Self> {
        let metrics = WorkerMetrics::new(&config.worker_id);
        metrics.set_pool_sizes(config.workflow_poll_capacity, config.activity_poll_capacity);
        metrics.set_status(STATUS_RUNNING);
        Arc::new(Self { config, orchestrator, repo, queue, metrics, status: AtomicI64::new(STATUS_RUNNING) })
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn status(&self) -> i64 {
        self.status.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.status() == STATUS_DRAINING
    }

    /// `POST /drain`: stop polling new work; currently
    /// running activities continue to heartbeat and run to completion
    /// (invariant 7: a drain never fails or cancels an in-flight
    /// activity).
    pub fn drain(&self) {
        if self.status.swap(STATUS_DRAINING, Ordering::SeqCst) != STATUS_DRAINING {
            info!(worker_id = %self.worker_id(), "drain requested, no longer polling for new work");
        }
        self.metrics.set_status(STATUS_DRAINING);
    }

    pub async fn enqueue(&self, activity: Activity) -> anyhow::Result<()> {
        self.queue.enqueue(activity).await
    }

    pub fn cancel_sync(&self, sync_id: SyncId) {
        self.queue.cancel_sync(sync_id);
    }

    /// Main poll loop. Runs until the queue closes (all senders dropped)
    /// or a drain completes (all in-flight activities finished after
    /// `drain()` was called). Distinct capacity semaphores for
    /// workflow-kind vs bookkeeping-kind activities default to 8 workflow
    /// polls and 16 activity polls concurrently.
    pub async fn run(self: Arc<Self>) {
        let workflow_sem = Arc::new(Semaphore::new(self.config.workflow_poll_capacity));
        let activity_sem = Arc::new(Semaphore::new(self.config.activity_poll_capacity));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if self.is_draining() {
                break;
            }
            match tokio::time::timeout(DRAIN_CHECK_INTERVAL, self.queue.poll()).await {
                Ok(None) => break,
                Err(_elapsed) => continue,
                Ok(Some(Dispatched { activity, cancel })) => {
                    self.spawn_activity(activity, cancel, &workflow_sem, &activity_sem, &mut in_flight).await;
                }
            }
        }

        info!(worker_id = %self.worker_id(), remaining = in_flight.len(), "poll loop stopped, waiting for in-flight activities");
        while in_flight.join_next().await.is_some() {}
        self.status.store(STATUS_NOT_RUNNING, Ordering::SeqCst);
        self.metrics.set_status(STATUS_NOT_RUNNING);
        info!(worker_id = %self.worker_id(), "worker stopped");
    }

    async fn spawn_activity(
        self: &Arc<Self>,
        activity: Activity,
        cancel: CancellationToken,
        workflow_sem: &Arc<Semaphore>,
        activity_sem: &Arc<Semaphore>,
        in_flight: &mut JoinSet<()>,
    ) {
        let this = self.clone();
        let kind = activity.kind();
        if activity.is_workflow() {
            let permit = workflow_sem.clone().acquire_owned().await.expect("semaphore not closed");
            in_flight.spawn(async move {
                let _permit = permit;
                this.metrics.inc_active_activities();
                this.run_workflow_activity(activity, cancel).await;
                this.metrics.dec_active_activities();
            });
        } else {
            let permit = activity_sem.clone().acquire_owned().await.expect("semaphore not closed");
            in_flight.spawn(async move {
                let _permit = permit;
                this.metrics.inc_active_activities();
                this.run_bookkeeping_activity(activity).await;
                this.metrics.dec_active_activities();
            });
        }
        info!(worker_id = %self.worker_id(), kind, "dispatched activity");
    }

    async fn run_workflow_activity(&self, activity: Activity, cancel: CancellationToken) {
        let Activity::RunSync { sync_id, force_full_sync } = activity else {
            return;
        };
        let connector_type = self.connector_type(sync_id).await;
        self.metrics.inc_active_syncs(&connector_type);
        match self.orchestrator.run_job(sync_id, force_full_sync, cancel).await {
            Ok(job_id) => info!(worker_id = %self.worker_id(), %sync_id, %job_id, "sync job finished"),
            Err(e) => error!(worker_id = %self.worker_id(), %sync_id, error = %e, "sync job failed to run"),
        }
        self.metrics.dec_active_syncs(&connector_type);
    }

    async fn run_bookkeeping_activity(&self, activity: Activity) {
        match activity {
            Activity::RunSync { .. } => unreachable!("workflow activities are routed separately"),
            Activity::CreateJob { sync_id } => {
                if let Err(e) = self.enqueue(Activity::RunSync { sync_id, force_full_sync: false }).await {
                    warn!(%sync_id, error = %e, "failed to enqueue run_sync after create_job");
                }
            }
            Activity::MarkCancelled { sync_id } => {
                self.cancel_sync(sync_id);
            }
            Activity::CleanupStuckJobs => match self.orchestrator.cleanup_stuck_jobs().await {
                Ok(n) if n > 0 => info!(cleaned = n, "force-cancelled stuck jobs"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "stuck-job cleanup sweep failed"),
            },
        }
    }

    async fn connector_type(&self, sync_id: SyncId) -> String {
        match self.repo.get_sync(sync_id).await {
            Ok(Some(sync)) => sync.source_short_name,
            _ => "unknown".to_string(),
        }
    }

    /// Spawns the periodic stuck-job cleanup sweep as a
    /// background task distinct from the main poll loop.
    pub fn spawn_stuck_job_sweeper(self: &Arc<Self>) {
        let this = self.clone();
        let interval = this.config.stuck_job_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if this.is_draining() {
                    continue;
                }
                if let Err(e) = this.enqueue(Activity::CleanupStuckJobs).await {
                    warn!(error = %e, "failed to enqueue stuck-job cleanup sweep");
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InProcessActivityQueue;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use futures::StreamExt;
    use weave_destinations::Destination;
    use weave_multiplex::InMemorySlotRepository;
    use weave_orchestrator::{DedupIndexFactory, DestinationFactory, DriverFactory, InMemoryDedupIndexFactory, InMemorySyncRepository, TokenProviderFactory};
    use weave_pipeline::{AccessTokenProvider, NoAuthTokenProvider};
    use weave_processors::RawProcessor;
    use weave_sources::{Result as SourceResult, SourceDriver, SourceEvent};
    use weave_text::{NoopOcrAdapter, TextBuilder};
    use weave_types::entity::Entity;
    use weave_types::ids::{ConnectionId, OrganizationId};
    use weave_types::sync::{Collection, DestinationRole, DestinationSlot, Sync};
    use weave_types::Cursor;

    struct EmptyDriver;
    #[async_trait]
    impl SourceDriver for EmptyDriver {
        fn short_name(&self) -> &'static str {
            "asana"
        }
        fn stream_entities(&self, _cursor: Option<Cursor>) -> BoxStream<'_, SourceResult<SourceEvent>> {
            futures::stream::iter(vec![Ok(SourceEvent::CursorUpdate(Cursor::GithubPushTimestamp(
                "2026-01-01T00:00:00Z".into(),
            )))])
            .boxed()
        }
    }

    struct EmptyDriverFactory;
    #[async_trait]
    impl DriverFactory for EmptyDriverFactory {
        async fn build_driver(&self, _sync: &Sync) -> weave_orchestrator::Result<Arc<dyn SourceDriver>> {
            Ok(Arc::new(EmptyDriver))
        }
    }

    struct NoopDestination;
    #[async_trait]
    impl Destination for NoopDestination {
        async fn bulk_upsert(&self, _entities: Vec<Entity>) -> weave_destinations::Result<()> {
            Ok(())
        }
        async fn bulk_delete(&self, _entity_ids: &[String]) -> weave_destinations::Result<()> {
            Ok(())
        }
        async fn bulk_delete_by_parent(&self, _parent_ids: &[String]) -> weave_destinations::Result<()> {
            Ok(())
        }
        fn has_keyword_index(&self) -> bool {
            false
        }
        fn content_processor(&self) -> Arc<dyn weave_processors::ContentProcessor> {
            Arc::new(RawProcessor)
        }
    }

    struct NoopDestinationFactory;
    #[async_trait]
    impl DestinationFactory for NoopDestinationFactory {
        async fn build_destination(&self, _slot: &DestinationSlot, _collection: &Collection) -> weave_orchestrator::Result<Arc<dyn Destination>> {
            Ok(Arc::new(NoopDestination))
        }
    }

    struct NoopTokenProviderFactory;
    #[async_trait]
    impl TokenProviderFactory for NoopTokenProviderFactory {
        async fn build_token_provider(&self, _sync: &Sync) -> weave_orchestrator::Result<Arc<dyn AccessTokenProvider>> {
            Ok(Arc::new(NoAuthTokenProvider))
        }
    }

    async fn runtime_with_one_sync() -> (Arc<WorkerRuntime>, Arc<InMemorySyncRepository>, SyncId) {
        let repo = Arc::new(InMemorySyncRepository::new());
        let slot_repo = Arc::new(InMemorySlotRepository::new());
        let collection_id = uuid::Uuid::new_v4();
        let sync = Sync {
            id: SyncId::new(),
            organization_id: OrganizationId::new(),
            connection_id: ConnectionId::new(),
            collection_id,
            source_short_name: "asana".to_string(),
            cursor: None,
            schedule_cron: None,
            is_active: true,
        };
        repo.seed_sync(sync.clone()).await;
        repo.seed_collection(Collection {
            id: collection_id,
            organization_id: sync.organization_id,
            name: "test".to_string(),
            readable_id: "test".to_string(),
        })
        .await;
        slot_repo
            .insert_slot(DestinationSlot {
                id: uuid::Uuid::new_v4(),
                collection_id,
                destination_type: "qdrant".to_string(),
                role: DestinationRole::Active,
                config: serde_json::json!({}),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(SyncOrchestrator::new(
            repo.clone(),
            slot_repo,
            Arc::new(EmptyDriverFactory),
            Arc::new(NoopDestinationFactory),
            Arc::new(NoopTokenProviderFactory),
            Arc::new(InMemoryDedupIndexFactory::new()),
            Arc::new(TextBuilder::new(Box::new(NoopOcrAdapter))),
            weave_storage::backend_from_url("memory://").unwrap(),
            tmp.path().to_path_buf(),
        ));

        let queue = InProcessActivityQueue::new();
        let mut config = WorkerConfig::from_env();
        config.worker_id = "test-worker".to_string();
        let runtime = WorkerRuntime::new(config, orchestrator, repo.clone(), queue);
        (runtime, repo, sync.id)
    }

    #[tokio::test]
    async fn drain_stops_the_poll_loop_and_reports_not_running() {
        let (runtime, _repo, _sync_id) = runtime_with_one_sync().await;
        assert_eq!(runtime.status(), STATUS_RUNNING);

        let run_handle = tokio::spawn(runtime.clone().run());
        runtime.drain();
        tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap();
        assert_eq!(runtime.status(), STATUS_NOT_RUNNING);
    }

    #[tokio::test]
    async fn dispatched_run_sync_completes_and_updates_job_status() {
        let (runtime, repo, sync_id) = runtime_with_one_sync().await;
        runtime.enqueue(Activity::RunSync { sync_id, force_full_sync: false }).await.unwrap();

        let run_handle = tokio::spawn(runtime.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.drain();
        tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap();

        let active = repo.get_active_job(sync_id).await.unwrap();
        assert!(active.is_none(), "job should have reached a terminal state");
    }
}
