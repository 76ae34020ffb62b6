//! Sync Orchestrator: assembles a job's `SyncContext`
//! from the injection seams in `factory.rs`, runs the entity pipeline
//! over the source driver's stream, tracks progress, and
//! handles cancellation/cleanup. This is the one crate that calls across
//! nearly every other component family — it owns none of them beyond the
//! duration of a single job.
//!
//! The main loop follows a preflight → instantiate → iterate → heartbeat
//! → cleanup shape, expressed with `tokio_util::sync::CancellationToken`
//! for cooperative cancellation rather than a hand-rolled atomic flag.

pub mod error;
pub mod factory;
pub mod repository;

pub use error::{OrchestratorError, Result};
pub use factory::{
    DedupIndexFactory, DestinationFactory, DriverFactory, InMemoryDedupIndexFactory,
    TokenManagerAccessProvider, TokenProviderFactory,
};
pub use repository::{InMemorySyncRepository, SyncRepository};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weave_download::Downloader;
use weave_multiplex::SlotRepository;
use weave_pipeline::{EntityPipeline, PipelineOutcome, PipelineTarget};
use weave_rawdata::RawDataService;
use weave_sources::SourceEvent;
use weave_storage::StorageBackend;
use weave_text::TextBuilder;
use weave_types::entity::{DeletionAttributes, DeletionStatus, Entity, EntityKind};
use weave_types::ids::{SyncId, SyncJobId};
use weave_types::sync::{DestinationRole, SyncJob, SyncJobStatus};

/// Poll every 30s, give up after 1h, while waiting for an
/// in-progress job on the same sync to finish ahead of a forced full sync.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const WAIT_CAP: Duration = Duration::from_secs(60 * 60);

/// Stuck-job cleanup thresholds.
const STUCK_CANCELLING_OR_PENDING: chrono::Duration = chrono::Duration::minutes(3);
const STUCK_RUNNING_NO_PROGRESS: chrono::Duration = chrono::Duration::minutes(10);

/// A bounded async worker pool; size is configurable, defaulting to the tens.
const DEFAULT_WORKER_CONCURRENCY: usize = 20;

/// Every injection seam + tunable the orchestrator needs to run a job,
/// assembled once per process and shared across every `run_job` call.
pub struct SyncOrchestrator {
    repo: Arc<dyn SyncRepository>,
    slot_repo: Arc<dyn SlotRepository>,
    driver_factory: Arc<dyn DriverFactory>,
    destination_factory: Arc<dyn DestinationFactory>,
    token_provider_factory: Arc<dyn TokenProviderFactory>,
    dedup_factory: Arc<dyn DedupIndexFactory>,
    text_builder: Arc<TextBuilder>,
    raw_storage_root: StorageBackend,
    tmp_root: PathBuf,
    worker_concurrency: usize,
    /// Whether SHADOW slots receive live writes during a job, not just a
    /// one-shot ARF replay.
    mirror_shadow: bool,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn SyncRepository>,
        slot_repo: Arc<dyn SlotRepository>,
        driver_factory: Arc<dyn DriverFactory>,
        destination_factory: Arc<dyn DestinationFactory>,
        token_provider_factory: Arc<dyn TokenProviderFactory>,
        dedup_factory: Arc<dyn DedupIndexFactory>,
        text_builder: Arc<TextBuilder>,
        raw_storage_root: StorageBackend,
        tmp_root: PathBuf,
    ) -> Self {
        Self {
            repo,
            slot_repo,
            driver_factory,
            destination_factory,
            token_provider_factory,
            dedup_factory,
            text_builder,
            raw_storage_root,
            tmp_root,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            mirror_shadow: false,
        }
    }

    pub fn with_worker_concurrency(mut self, n: usize) -> Self {
        self.worker_concurrency = n;
        self
    }

    pub fn with_shadow_mirroring(mut self, mirror: bool) -> Self {
        self.mirror_shadow = mirror;
        self
    }

    /// Runs one sync job end to end: preflight, main loop, post-flight.
    /// `cancel` is observed at heartbeat points; callers typically hand this the same token a worker
    /// cancels when it receives a cancellation signal for this activity.
    pub async fn run_job(&self, sync_id: SyncId, force_full_sync: bool, cancel: CancellationToken) -> Result<SyncJobId> {
        let sync = self
            .repo
            .get_sync(sync_id)
            .await?
            .ok_or(OrchestratorError::SyncNotFound(sync_id))?;
        let collection = self
            .repo
            .get_collection(sync.collection_id)
            .await?
            .ok_or(OrchestratorError::CollectionNotFound(sync.collection_id))?;

        self.wait_for_prior_job(sync_id, force_full_sync).await?;

        let mut job = SyncJob::new(sync_id, force_full_sync);
        job.status = SyncJobStatus::Running;
        job.started_at = Some(chrono::Utc::now());
        self.repo.insert_job(job.clone()).await?;

        info!(%sync_id, job_id = %job.id, force_full_sync, "sync job started");

        match self.run_job_inner(&sync, &collection, &mut job, &cancel).await {
            Ok(()) => {
                job.status = if cancel.is_cancelled() {
                    SyncJobStatus::Cancelled
                } else {
                    SyncJobStatus::Completed
                };
            }
            Err(e) => {
                error!(%sync_id, job_id = %job.id, error = %e, "sync job failed");
                job.status = SyncJobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        job.completed_at = Some(chrono::Utc::now());
        self.repo.update_job(job.clone()).await?;
        Ok(job.id)
    }

    /// Refuses to start a job if another one for this sync is
    /// PENDING/RUNNING/CANCELLING unless `force_full_sync`, in which case
    /// wait (polling every 30s, up to 1h) for the other job to terminate.
    async fn wait_for_prior_job(&self, sync_id: SyncId, force_full_sync: bool) -> Result<()> {
        let Some(active) = self.repo.get_active_job(sync_id).await? else {
            return Ok(());
        };
        if !force_full_sync {
            return Err(OrchestratorError::AnotherJobInProgress(sync_id, active.id));
        }

        let deadline = tokio::time::Instant::now() + WAIT_CAP;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(OrchestratorError::WaitTimedOut(sync_id));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            match self.repo.get_job(active.id).await? {
                Some(job) if job.status.is_terminal() => return Ok(()),
                None => return Ok(()),
                _ => continue,
            }
        }
    }

    async fn run_job_inner(
        &self,
        sync: &weave_types::sync::Sync,
        collection: &weave_types::sync::Collection,
        job: &mut SyncJob,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let driver = self.driver_factory.build_driver(sync).await?;
        let token_provider = self.token_provider_factory.build_token_provider(sync).await?;
        let dedup = self.dedup_factory.build_dedup_index(sync.id).await?;

        let slots = self.slot_repo.list_slots(sync.collection_id).await.map_err(OrchestratorError::Other)?;
        let mut targets = Vec::with_capacity(slots.len());
        for slot in &slots {
            let destination = self.destination_factory.build_destination(slot, collection).await?;
            targets.push(PipelineTarget { destination, role: slot.role });
        }
        if targets.is_empty() || !targets.iter().any(|t| t.role == DestinationRole::Active) {
            return Err(OrchestratorError::Other(anyhow::anyhow!(
                "sync {} has no ACTIVE destination slot",
                sync.id
            )));
        }

        let downloader = Arc::new(Downloader::new(&self.tmp_root, job.id).await.map_err(anyhow::Error::from)?);
        let raw_data = Arc::new(RawDataService::new(self.raw_storage_root.scoped(&format!("raw/{}", sync.id))));
        let tracker = Arc::new(raw_data.start_sync_tracking(job.id));

        let pipeline = Arc::new(EntityPipeline::new(
            sync.id,
            job.id,
            dedup,
            downloader.clone(),
            self.text_builder.clone(),
            targets,
            raw_data.clone(),
            token_provider,
            self.mirror_shadow,
        ));

        let result = self
            .consume_stream(driver.as_ref(), sync, job, &pipeline, tracker.clone(), cancel)
            .await;

        // Post-flight cleanup always runs, even on a cancelled or failed
        // job.
        downloader.cleanup_sync_directory().await;

        let (inserted, updated, deleted, kept, skipped) = pipeline.counters().snapshot();
        job.entities_inserted = inserted;
        job.entities_updated = updated;
        job.entities_deleted = deleted;
        job.entities_kept = kept;
        job.entities_skipped = skipped;

        result?;

        if job.force_full_sync && !cancel.is_cancelled() {
            let removed = raw_data.cleanup_stale_entities(tracker.as_ref()).await.map_err(anyhow::Error::from)?;
            if removed > 0 {
                info!(sync_id = %sync.id, job_id = %job.id, removed, "cleaned up stale raw-data entities after full sync");
            }
        }

        Ok(())
    }

    /// Main loop: iterate `driver.stream_entities(cursor)`, dispatching
    /// each event onto a bounded worker pool. Ordering across
    /// entities isn't guaranteed (dedup is keyed by `entity_id`), so
    /// entities run concurrently up to `worker_concurrency`; only the
    /// terminal `CursorUpdate` event is handled after every in-flight
    /// entity has drained, so a crash mid-job never commits a cursor past
    /// entities that weren't actually persisted.
    async fn consume_stream(
        &self,
        driver: &dyn weave_sources::SourceDriver,
        sync: &weave_types::sync::Sync,
        job: &mut SyncJob,
        pipeline: &Arc<EntityPipeline>,
        tracker: Arc<weave_rawdata::SyncTracker>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.worker_concurrency));
        let mut in_flight = futures::stream::FuturesUnordered::new();
        let mut stream = driver.stream_entities(sync.cursor.clone());
        let mut new_cursor = None;
        let mut heartbeat = tokio::time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    job.status = SyncJobStatus::Cancelling;
                    info!(sync_id = %sync.id, job_id = %job.id, "cancellation requested, draining in-flight entities");
                    break;
                }
                _ = heartbeat.tick() => {
                    job.last_heartbeat_at = Some(chrono::Utc::now());
                    self.repo.update_job(job.clone()).await?;
                }
                maybe_outcome = in_flight.next(), if !in_flight.is_empty() => {
                    if let Some(outcome) = maybe_outcome {
                        self.observe_entity_outcome(outcome);
                    }
                }
                maybe_event = stream.next() => {
                    match maybe_event {
                        Some(Ok(SourceEvent::Entity(entity))) => {
                            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                            let pipeline = pipeline.clone();
                            let tracker = tracker.clone();
                            in_flight.push(tokio::spawn(async move {
                                let _permit = permit;
                                let result = pipeline.process_one(entity, &tracker).await;
                                drop(_permit);
                                result
                            }));
                        }
                        Some(Ok(SourceEvent::Deletion(entity_id))) => {
                            let entity = deletion_entity(&entity_id, &sync.source_short_name);
                            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                            let pipeline = pipeline.clone();
                            let tracker = tracker.clone();
                            in_flight.push(tokio::spawn(async move {
                                let _permit = permit;
                                let result = pipeline.process_one(entity, &tracker).await;
                                drop(_permit);
                                result
                            }));
                        }
                        Some(Ok(SourceEvent::CursorUpdate(cursor))) => {
                            new_cursor = Some(cursor);
                        }
                        Some(Err(weave_sources::SourceError::ItemFailed(reason))) => {
                            warn!(sync_id = %sync.id, job_id = %job.id, %reason, "source item failed, skipping");
                            pipeline.record_external_skip();
                        }
                        Some(Err(e @ weave_sources::SourceError::Fatal(_))) => {
                            return Err(OrchestratorError::Source(e));
                        }
                        Some(Err(e)) => {
                            return Err(OrchestratorError::Source(e));
                        }
                        None => break,
                    }
                }
            }
        }

        // Drain whatever is still in flight, whether we stopped because
        // the stream ended or because of a cancellation signal (spec
        // §4.14: "finish the in-flight entity, run cleanup, then
        // transition to CANCELLED").
        while let Some(outcome) = in_flight.next().await {
            self.observe_entity_outcome(outcome);
        }

        if let Some(cursor) = new_cursor {
            self.repo.update_cursor(sync.id, Some(cursor)).await?;
        }

        Ok(())
    }

    fn observe_entity_outcome(&self, joined: std::result::Result<weave_pipeline::Result<PipelineOutcome>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(_outcome)) => {}
            Ok(Err(weave_pipeline::PipelineError::EntityProcessing(reason))) => {
                warn!(%reason, "entity processing error (already counted as skipped)");
            }
            Ok(Err(e @ weave_pipeline::PipelineError::SyncFailure(_))) => {
                error!(error = %e, "fatal pipeline error");
            }
            Err(join_err) => {
                error!(error = %join_err, "entity task panicked");
            }
        }
    }

    /// Periodic cleanup job: force-cancels jobs stuck in
    /// CANCELLING/PENDING for too long, and RUNNING jobs with no
    /// heartbeat progress. Intended to run on its own interval, separate
    /// from any individual `run_job` call.
    pub async fn cleanup_stuck_jobs(&self) -> Result<usize> {
        let now = chrono::Utc::now();
        let mut cleaned = 0usize;
        for mut job in self.repo.list_active_jobs().await? {
            let stuck = match job.status {
                SyncJobStatus::Pending | SyncJobStatus::Cancelling => {
                    now - job.created_at > STUCK_CANCELLING_OR_PENDING
                }
                SyncJobStatus::Running => {
                    let last_progress = job.last_heartbeat_at.unwrap_or(job.created_at);
                    now - last_progress > STUCK_RUNNING_NO_PROGRESS
                }
                _ => false,
            };
            if !stuck {
                continue;
            }
            job.status = if job.status == SyncJobStatus::Cancelling {
                SyncJobStatus::Cancelled
            } else {
                SyncJobStatus::Failed
            };
            job.error = Some("force-cancelled by stuck-job cleanup".to_string());
            job.completed_at = Some(now);
            self.repo.update_job(job.clone()).await?;
            warn!(job_id = %job.id, sync_id = %job.sync_id, new_status = ?job.status, "force-cancelled stuck job");
            cleaned += 1;
        }
        Ok(cleaned)
    }
}

fn deletion_entity(entity_id: &str, source_short_name: &str) -> Entity {
    let mut entity = Entity::new(entity_id, source_short_name, EntityKind::Deletion);
    entity.deletion = Some(DeletionAttributes { deletion_status: DeletionStatus::Deleted });
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use weave_destinations::Destination;
    use weave_pipeline::{AccessTokenProvider, NoAuthTokenProvider};
    use weave_processors::RawProcessor;
    use weave_sources::{Result as SourceResult, SourceDriver};
    use weave_types::entity::{AsanaTaskFields, EntityKind};
    use weave_types::ids::{ConnectionId, OrganizationId};
    use weave_types::sync::{Collection, DestinationSlot, Sync};
    use weave_types::{Cursor, WeaveError};

    struct FixtureDriver {
        entities: Vec<Entity>,
    }

    #[async_trait]
    impl SourceDriver for FixtureDriver {
        fn short_name(&self) -> &'static str {
            "asana"
        }

        fn stream_entities(&self, _cursor: Option<Cursor>) -> BoxStream<'_, SourceResult<SourceEvent>> {
            let mut events: Vec<SourceResult<SourceEvent>> =
                self.entities.iter().cloned().map(|e| Ok(SourceEvent::Entity(e))).collect();
            events.push(Ok(SourceEvent::CursorUpdate(Cursor::GithubPushTimestamp("2026-01-01T00:00:00Z".into()))));
            futures::stream::iter(events).boxed()
        }
    }

    struct FixtureDriverFactory {
        entities: Vec<Entity>,
    }

    #[async_trait]
    impl DriverFactory for FixtureDriverFactory {
        async fn build_driver(&self, _sync: &Sync) -> Result<Arc<dyn SourceDriver>> {
            Ok(Arc::new(FixtureDriver { entities: self.entities.clone() }))
        }
    }

    struct RecordingDestination {
        upserted: tokio::sync::Mutex<Vec<Entity>>,
    }

    #[async_trait]
    impl Destination for RecordingDestination {
        async fn bulk_upsert(&self, entities: Vec<Entity>) -> weave_destinations::Result<()> {
            self.upserted.lock().await.extend(entities);
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

    struct FixtureDestinationFactory {
        destination: Arc<RecordingDestination>,
    }

    #[async_trait]
    impl DestinationFactory for FixtureDestinationFactory {
        async fn build_destination(&self, _slot: &DestinationSlot, _collection: &Collection) -> Result<Arc<dyn Destination>> {
            Ok(self.destination.clone())
        }
    }

    struct NoopTokenProviderFactory;

    #[async_trait]
    impl TokenProviderFactory for NoopTokenProviderFactory {
        async fn build_token_provider(&self, _sync: &Sync) -> Result<Arc<dyn AccessTokenProvider>> {
            Ok(Arc::new(NoAuthTokenProvider))
        }
    }

    fn task_entity(id: &str) -> Entity {
        Entity::new(
            id,
            "asana",
            EntityKind::AsanaTask(AsanaTaskFields {
                gid: id.into(),
                name: "Ship it".into(),
                notes: Some("notes".into()),
                completed: false,
                assignee_name: None,
                project_gid: "p".into(),
                due_on: None,
                permalink_url: None,
            }),
        )
    }

    async fn orchestrator_with(
        entities: Vec<Entity>,
        destination: Arc<RecordingDestination>,
    ) -> (SyncOrchestrator, Arc<InMemorySyncRepository>, Sync, tempfile::TempDir) {
        let repo = Arc::new(InMemorySyncRepository::new());
        let slot_repo = Arc::new(weave_multiplex::InMemorySlotRepository::new());
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
        let orchestrator = SyncOrchestrator::new(
            repo.clone(),
            slot_repo,
            Arc::new(FixtureDriverFactory { entities }),
            Arc::new(FixtureDestinationFactory { destination }),
            Arc::new(NoopTokenProviderFactory),
            Arc::new(InMemoryDedupIndexFactory::new()),
            Arc::new(TextBuilder::new(Box::new(weave_text::NoopOcrAdapter))),
            weave_storage::backend_from_url("memory://").unwrap(),
            tmp.path().to_path_buf(),
        );
        (orchestrator, repo, sync, tmp)
    }

    #[tokio::test]
    async fn pure_insert_run_completes_with_expected_counters() {
        let destination = Arc::new(RecordingDestination { upserted: tokio::sync::Mutex::new(Vec::new()) });
        let (orchestrator, repo, sync, _tmp) =
            orchestrator_with(vec![task_entity("1"), task_entity("2")], destination.clone()).await;

        let job_id = orchestrator.run_job(sync.id, false, CancellationToken::new()).await.unwrap();
        let job = repo.get_job(job_id).await.unwrap().unwrap();

        assert_eq!(job.status, SyncJobStatus::Completed);
        assert_eq!(job.entities_inserted, 2);
        assert_eq!(job.entities_updated, 0);
        assert_eq!(job.entities_kept, 0);
        assert_eq!(destination.upserted.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn rerun_is_idempotent_and_reports_kept() {
        let destination = Arc::new(RecordingDestination { upserted: tokio::sync::Mutex::new(Vec::new()) });
        let (orchestrator, repo, sync, _tmp) =
            orchestrator_with(vec![task_entity("1")], destination.clone()).await;

        orchestrator.run_job(sync.id, false, CancellationToken::new()).await.unwrap();
        let job_id = orchestrator.run_job(sync.id, false, CancellationToken::new()).await.unwrap();
        let job = repo.get_job(job_id).await.unwrap().unwrap();

        assert_eq!(job.status, SyncJobStatus::Completed);
        assert_eq!(job.entities_kept, 1);
        assert_eq!(job.entities_inserted, 0);
        assert_eq!(destination.upserted.lock().await.len(), 1, "kept entity must not be rewritten");
    }

    #[tokio::test]
    async fn second_job_on_same_sync_is_refused_without_force() {
        let destination = Arc::new(RecordingDestination { upserted: tokio::sync::Mutex::new(Vec::new()) });
        let (orchestrator, repo, sync, _tmp) =
            orchestrator_with(vec![task_entity("1")], destination.clone()).await;

        let mut stuck = SyncJob::new(sync.id, false);
        stuck.status = SyncJobStatus::Running;
        repo.insert_job(stuck).await.unwrap();

        let err = orchestrator.run_job(sync.id, false, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AnotherJobInProgress(_, _)));
    }

    #[tokio::test]
    async fn empty_source_stream_completes_with_all_zero_counters() {
        let destination = Arc::new(RecordingDestination { upserted: tokio::sync::Mutex::new(Vec::new()) });
        let (orchestrator, repo, sync, _tmp) = orchestrator_with(vec![], destination.clone()).await;

        let job_id = orchestrator.run_job(sync.id, false, CancellationToken::new()).await.unwrap();
        let job = repo.get_job(job_id).await.unwrap().unwrap();

        assert_eq!(job.status, SyncJobStatus::Completed);
        assert_eq!(job.entities_inserted, 0);
        assert_eq!(job.entities_updated, 0);
        assert_eq!(job.entities_kept, 0);
        assert_eq!(job.entities_deleted, 0);
        assert_eq!(job.entities_skipped, 0);
    }

    #[tokio::test]
    async fn unknown_sync_id_fails_preflight() {
        let destination = Arc::new(RecordingDestination { upserted: tokio::sync::Mutex::new(Vec::new()) });
        let (orchestrator, _repo, _sync, _tmp) = orchestrator_with(vec![], destination).await;
        let err = orchestrator.run_job(SyncId::new(), false, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SyncNotFound(_)));
    }
}
