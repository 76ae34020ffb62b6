//! Entity Pipeline: the per-entity state machine every
//! driver-emitted entity passes through — enrichment, hashing, dedup,
//! file download, content-processor shaping, destination writes, and raw
//! archival. Grounded on the combination of C5 (`weave-download`), C6
//! (`weave-text`), C9 (`weave-processors`), C10 (`weave-destinations`),
//! and C11 (`weave-rawdata`); this crate's only original logic is the
//! dedup decision (`dedup.rs`) and the ordering that ties the rest
//! together.
//!
//! Per-entity failures are isolated here by design: an
//! `EntityProcessingError` increments the skipped counter and the caller
//! moves on to the next entity, while a `SyncFailureError` propagates so
//! the orchestrator can fail the whole job.

pub mod dedup;
pub mod error;

pub use dedup::{DedupDecision, DedupIndex, InMemoryDedupIndex};
pub use error::{PipelineError, Result};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use weave_destinations::Destination;
use weave_download::{DownloadOutcome, Downloader, SkipReason};
use weave_rawdata::{RawDataService, SyncTracker};
use weave_text::TextBuilder;
use weave_types::entity::Entity;
use weave_types::ids::{SyncId, SyncJobId};
use weave_types::sync::DestinationRole;
use weave_types::WeaveError;

/// Narrow boundary onto C3 (`weave-tokens`): the pipeline only ever needs
/// "give me a currently-valid bearer token," never the connection id or
/// refresh-token bookkeeping that earns it one.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> std::result::Result<Option<String>, WeaveError>;
}

/// No-auth sources (a public Postgres instance, a pre-signed-URL-only
/// feed) never need a provider; this is also what tests use.
pub struct NoAuthTokenProvider;

#[async_trait]
impl AccessTokenProvider for NoAuthTokenProvider {
    async fn access_token(&self) -> std::result::Result<Option<String>, WeaveError> {
        Ok(None)
    }
}

/// One destination slot this pipeline instance writes to, alongside
/// whether it should receive *new* writes for this job. `weave-multiplex` decides that policy; this struct
/// just carries the answer.
pub struct PipelineTarget {
    pub destination: Arc<dyn Destination>,
    pub role: DestinationRole,
}

impl PipelineTarget {
    fn receives_new_writes(&self, mirror_shadow: bool) -> bool {
        match self.role {
            DestinationRole::Active => true,
            DestinationRole::Shadow => mirror_shadow,
            DestinationRole::Deprecated => false,
        }
    }
}

/// Authoritative, user-visible job counters.
#[derive(Default)]
pub struct PipelineCounters {
    pub inserted: AtomicU64,
    pub updated: AtomicU64,
    pub deleted: AtomicU64,
    pub kept: AtomicU64,
    pub skipped: AtomicU64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.inserted.load(Ordering::Relaxed),
            self.updated.load(Ordering::Relaxed),
            self.deleted.load(Ordering::Relaxed),
            self.kept.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
        )
    }
}

/// Why an entity was counted as skipped rather than written — carried
/// back to the caller for logging, not for branching (the counter is
/// already incremented by the time this is returned).
#[derive(Debug)]
pub enum SkipReasonKind {
    Download(SkipReason),
    NoText,
    ProcessorDropped,
}

/// What happened to one entity.
#[derive(Debug)]
pub enum PipelineOutcome {
    Inserted,
    Updated,
    Kept,
    Deleted,
    Skipped(SkipReasonKind),
}

pub struct EntityPipeline {
    sync_id: SyncId,
    sync_job_id: SyncJobId,
    dedup: Arc<dyn DedupIndex>,
    downloader: Arc<Downloader>,
    text_builder: Arc<TextBuilder>,
    targets: Vec<PipelineTarget>,
    raw_data: Arc<RawDataService>,
    token_provider: Arc<dyn AccessTokenProvider>,
    mirror_shadow: bool,
    counters: PipelineCounters,
}

impl EntityPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync_id: SyncId,
        sync_job_id: SyncJobId,
        dedup: Arc<dyn DedupIndex>,
        downloader: Arc<Downloader>,
        text_builder: Arc<TextBuilder>,
        targets: Vec<PipelineTarget>,
        raw_data: Arc<RawDataService>,
        token_provider: Arc<dyn AccessTokenProvider>,
        mirror_shadow: bool,
    ) -> Self {
        Self {
            sync_id,
            sync_job_id,
            dedup,
            downloader,
            text_builder,
            targets,
            raw_data,
            token_provider,
            mirror_shadow,
            counters: PipelineCounters::default(),
        }
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    /// Counts a skip that never produced an `Entity` to run through
    /// `process_one` — a driver's per-item failure happens before an entity ever reaches
    /// the pipeline, but it still owes the job's skipped counter an entry.
    pub fn record_external_skip(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs one entity through all seven pipeline steps. Returns
    /// `Ok` for every outcome including skips — only `PipelineError`
    /// variants that the caller should treat as fatal (`SyncFailure`)
    /// propagate out of the `?` chain below as errors; everything else is
    /// folded into `PipelineOutcome::Skipped` before it gets here.
    pub async fn process_one(&self, mut entity: Entity, tracker: &SyncTracker) -> Result<PipelineOutcome> {
        // Step 1: enrichment. `source_name` and `entity_type` are already
        // stamped at construction (`Entity::new`); the pipeline only
        // knows the sync/job ids.
        entity.system_metadata.sync_id = Some(self.sync_id);
        entity.system_metadata.sync_job_id = Some(self.sync_job_id);

        if entity.is_deletion() {
            return self.process_deletion(entity).await;
        }

        // Step 2: hashing.
        let hash = dedup::compute_hash(&entity);

        // Step 3: dedup decision.
        let decision = dedup::decide(self.dedup.as_ref(), &entity.entity_id, false, &hash).await;
        if decision == DedupDecision::Keep {
            tracker.mark_seen(&entity.entity_id);
            self.counters.kept.fetch_add(1, Ordering::Relaxed);
            return Ok(PipelineOutcome::Kept);
        }

        // Step 4: file handling.
        if let Some(reason) = self.maybe_download(&mut entity).await? {
            tracker.mark_seen(&entity.entity_id);
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(entity_id = %entity.entity_id, ?reason, "skipped entity: file download");
            return Ok(PipelineOutcome::Skipped(SkipReasonKind::Download(reason)));
        }

        match self.text_builder.build_text(&entity).await {
            Ok(Some(text)) => entity.textual_representation = Some(text),
            Ok(None) => {
                tracker.mark_seen(&entity.entity_id);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(PipelineOutcome::Skipped(SkipReasonKind::NoText));
            }
            Err(e) => {
                // Conversion failures are per-entity, not
                // job-fatal — count as skipped and move on.
                tracker.mark_seen(&entity.entity_id);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                warn!(entity_id = %entity.entity_id, error = %e, "skipped entity: text conversion failed");
                return Ok(PipelineOutcome::Skipped(SkipReasonKind::NoText));
            }
        }

        // Step 5 + 6: shape and persist, per destination slot that wants
        // new writes this job.
        let mut wrote_anywhere = false;
        for target in &self.targets {
            if !target.receives_new_writes(self.mirror_shadow) {
                continue;
            }
            let shaped = target.destination.content_processor().process(entity.clone()).await?;
            if shaped.is_empty() {
                // e.g. the code chunker's language filter:
                // this destination doesn't want this entity, but others
                // might still write it.
                continue;
            }
            if decision == DedupDecision::Update {
                target.destination.bulk_delete_by_parent(&[entity.entity_id.clone()]).await?;
            }
            target.destination.bulk_upsert(shaped).await?;
            wrote_anywhere = true;
        }

        // Step 7: archive.
        self.raw_data.upsert_entity(&entity, None).await?;
        tracker.mark_seen(&entity.entity_id);
        self.dedup.set(&entity.entity_id, &hash).await;

        if !wrote_anywhere {
            // Every configured destination dropped it (e.g. an
            // unsupported code language on the only destination in
            // scope) — still archived and deduped, but nothing was
            // actually written anywhere, so count it as skipped rather
            // than a phantom insert/update.
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(PipelineOutcome::Skipped(SkipReasonKind::ProcessorDropped));
        }

        Ok(match decision {
            DedupDecision::Insert => {
                self.counters.inserted.fetch_add(1, Ordering::Relaxed);
                PipelineOutcome::Inserted
            }
            DedupDecision::Update => {
                self.counters.updated.fetch_add(1, Ordering::Relaxed);
                PipelineOutcome::Updated
            }
            DedupDecision::Keep | DedupDecision::Delete => unreachable!("handled above"),
        })
    }

    async fn process_deletion(&self, entity: Entity) -> Result<PipelineOutcome> {
        for target in &self.targets {
            if target.role == DestinationRole::Deprecated {
                continue;
            }
            target.destination.bulk_delete(&[entity.entity_id.clone()]).await?;
        }
        self.raw_data.delete_entity(&entity.entity_id).await?;
        self.dedup.remove(&entity.entity_id).await;
        self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        Ok(PipelineOutcome::Deleted)
    }

    /// Returns `Some(reason)` when the entity should be counted as
    /// skipped; `None` covers both "not a file entity" and "downloaded
    /// (or already had a local path) successfully."
    async fn maybe_download(&self, entity: &mut Entity) -> Result<Option<SkipReason>> {
        let Some(url) = entity.file.as_ref().and_then(|f| f.url.clone()) else {
            return Ok(None);
        };
        if entity.file.as_ref().and_then(|f| f.local_path.as_ref()).is_some() {
            return Ok(None);
        }
        let token = self.token_provider.access_token().await.unwrap_or(None);
        match self.downloader.download_from_url(entity, &url, token.as_deref()).await? {
            DownloadOutcome::Downloaded { .. } => Ok(None),
            DownloadOutcome::Skipped(reason) => Ok(Some(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_processors::RawProcessor;
    use weave_types::entity::{AsanaTaskFields, DeletionAttributes, DeletionStatus, EntityKind};

    struct FakeDestination {
        role: DestinationRole,
        upserted: tokio::sync::Mutex<Vec<Entity>>,
        deleted: tokio::sync::Mutex<Vec<String>>,
        deleted_by_parent: tokio::sync::Mutex<Vec<String>>,
    }

    impl FakeDestination {
        fn new() -> Self {
            Self {
                role: DestinationRole::Active,
                upserted: tokio::sync::Mutex::new(Vec::new()),
                deleted: tokio::sync::Mutex::new(Vec::new()),
                deleted_by_parent: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Destination for FakeDestination {
        async fn bulk_upsert(&self, entities: Vec<Entity>) -> weave_destinations::Result<()> {
            self.upserted.lock().await.extend(entities);
            Ok(())
        }
        async fn bulk_delete(&self, entity_ids: &[String]) -> weave_destinations::Result<()> {
            self.deleted.lock().await.extend(entity_ids.iter().cloned());
            Ok(())
        }
        async fn bulk_delete_by_parent(&self, parent_ids: &[String]) -> weave_destinations::Result<()> {
            self.deleted_by_parent.lock().await.extend(parent_ids.iter().cloned());
            Ok(())
        }
        fn has_keyword_index(&self) -> bool {
            false
        }
        fn content_processor(&self) -> Arc<dyn weave_processors::ContentProcessor> {
            Arc::new(RawProcessor)
        }
    }

    fn task_entity(id: &str, notes: &str) -> Entity {
        Entity::new(
            id,
            "asana",
            EntityKind::AsanaTask(AsanaTaskFields {
                gid: id.into(),
                name: "Ship it".into(),
                notes: Some(notes.into()),
                completed: false,
                assignee_name: None,
                project_gid: "p".into(),
                due_on: None,
                permalink_url: None,
            }),
        )
    }

    fn deletion_entity(id: &str) -> Entity {
        let mut e = Entity::new(id, "asana", EntityKind::Deletion);
        e.deletion = Some(DeletionAttributes { deletion_status: DeletionStatus::Deleted });
        e
    }

    async fn pipeline_with(destination: Arc<FakeDestination>) -> (EntityPipeline, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = Arc::new(Downloader::new(tmp.path(), "job-1").await.unwrap());
        let raw = Arc::new(RawDataService::new(weave_storage::backend_from_url("memory://").unwrap().scoped("raw/test")));
        let role = destination.role;
        let pipeline = EntityPipeline::new(
            SyncId::new(),
            SyncJobId::new(),
            Arc::new(InMemoryDedupIndex::new()),
            downloader,
            Arc::new(TextBuilder::new(Box::new(weave_text::NoopOcrAdapter))),
            vec![PipelineTarget { destination, role }],
            raw,
            Arc::new(NoAuthTokenProvider),
            false,
        );
        (pipeline, tmp)
    }

    #[tokio::test]
    async fn new_entity_is_inserted_and_archived() {
        let destination = Arc::new(FakeDestination::new());
        let (pipeline, _tmp) = pipeline_with(destination.clone()).await;
        let tracker = tracker_for_test();

        let outcome = pipeline.process_one(task_entity("1", "notes"), &tracker).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Inserted));
        assert_eq!(destination.upserted.lock().await.len(), 1);
        let (inserted, _, _, _, _) = pipeline.counters().snapshot();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn rerun_with_unchanged_content_is_kept_not_rewritten() {
        let destination = Arc::new(FakeDestination::new());
        let (pipeline, _tmp) = pipeline_with(destination.clone()).await;
        let tracker = tracker_for_test();

        pipeline.process_one(task_entity("1", "notes"), &tracker).await.unwrap();
        let outcome = pipeline.process_one(task_entity("1", "notes"), &tracker).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Kept));
        assert_eq!(destination.upserted.lock().await.len(), 1, "kept entity must not be rewritten");
        let (_, _, _, kept, _) = pipeline.counters().snapshot();
        assert_eq!(kept, 1);
    }

    #[tokio::test]
    async fn changed_content_is_updated_and_old_chunks_deleted_first() {
        let destination = Arc::new(FakeDestination::new());
        let (pipeline, _tmp) = pipeline_with(destination.clone()).await;
        let tracker = tracker_for_test();

        pipeline.process_one(task_entity("1", "old notes"), &tracker).await.unwrap();
        let outcome = pipeline.process_one(task_entity("1", "new notes"), &tracker).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Updated));
        assert_eq!(destination.deleted_by_parent.lock().await.len(), 1);
        assert_eq!(destination.upserted.lock().await.len(), 2);
        let (_, updated, _, _, _) = pipeline.counters().snapshot();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn deletion_entity_deletes_from_destination_and_raw_store() {
        let destination = Arc::new(FakeDestination::new());
        let (pipeline, _tmp) = pipeline_with(destination.clone()).await;
        let tracker = tracker_for_test();

        pipeline.process_one(task_entity("1", "notes"), &tracker).await.unwrap();
        let outcome = pipeline.process_one(deletion_entity("1"), &tracker).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Deleted));
        assert_eq!(destination.deleted.lock().await[0], "1");
        let (_, _, deleted, _, _) = pipeline.counters().snapshot();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn deprecated_slot_never_receives_deletes() {
        let mut destination = FakeDestination::new();
        destination.role = DestinationRole::Deprecated;
        let destination = Arc::new(destination);
        let (pipeline, _tmp) = pipeline_with(destination.clone()).await;
        let tracker = tracker_for_test();

        pipeline.process_one(deletion_entity("1"), &tracker).await.unwrap();
        assert!(destination.deleted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn shadow_slot_without_mirroring_receives_no_new_writes() {
        let mut destination = FakeDestination::new();
        destination.role = DestinationRole::Shadow;
        let destination = Arc::new(destination);
        let (pipeline, _tmp) = pipeline_with(destination.clone()).await;
        let tracker = tracker_for_test();

        let outcome = pipeline.process_one(task_entity("1", "notes"), &tracker).await.unwrap();
        // Archived and deduped, but the shadow slot itself stays empty
        // since it isn't being backfilled.
        assert!(matches!(outcome, PipelineOutcome::Skipped(SkipReasonKind::ProcessorDropped)));
        assert!(destination.upserted.lock().await.is_empty());
    }

    // `SyncTracker` has no public constructor outside `RawDataService`;
    // this mirrors the one the orchestrator would get from
    // `raw_data.start_sync_tracking(job_id)`.
    fn tracker_for_test() -> SyncTracker {
        let raw = RawDataService::new(weave_storage::backend_from_url("memory://").unwrap().scoped("raw/tracker-test"));
        raw.start_sync_tracking(SyncJobId::new())
    }
}
