//! `SyncRepository` is the narrow DB-access boundary the orchestrator calls
//! across for `sync`/`sync_job`/`collection` rows. Destination-slot
//! access goes through `weave_multiplex::SlotRepository` directly instead
//! of being duplicated here, since the multiplexer already owns that
//! boundary.

use async_trait::async_trait;
use tokio::sync::Mutex;
use weave_types::cursor::Cursor;
use weave_types::ids::{SyncId, SyncJobId};
use weave_types::sync::{Collection, Sync, SyncJob, SyncJobStatus};

#[async_trait]
pub trait SyncRepository: Send + Sync {
    async fn get_sync(&self, sync_id: SyncId) -> anyhow::Result<Option<Sync>>;
    async fn get_collection(&self, collection_id: uuid::Uuid) -> anyhow::Result<Option<Collection>>;

    /// The sync's current non-terminal job, if any.
    async fn get_active_job(&self, sync_id: SyncId) -> anyhow::Result<Option<SyncJob>>;

    async fn insert_job(&self, job: SyncJob) -> anyhow::Result<()>;
    async fn get_job(&self, job_id: SyncJobId) -> anyhow::Result<Option<SyncJob>>;
    async fn update_job(&self, job: SyncJob) -> anyhow::Result<()>;

    /// Every job currently in a non-terminal status, for the periodic
    /// stuck-job cleanup pass.
    async fn list_active_jobs(&self) -> anyhow::Result<Vec<SyncJob>>;

    async fn update_cursor(&self, sync_id: SyncId, cursor: Option<Cursor>) -> anyhow::Result<()>;
}

/// In-memory `SyncRepository` for tests and single-pod dev deployments —
/// same "trait + in-memory fake + real backend" shape as `weave-kv`'s
/// `KvStore` and `weave-multiplex`'s `SlotRepository`.
#[derive(Default)]
pub struct InMemorySyncRepository {
    syncs: Mutex<Vec<Sync>>,
    collections: Mutex<Vec<Collection>>,
    jobs: Mutex<Vec<SyncJob>>,
}

impl InMemorySyncRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_sync(&self, sync: Sync) {
        self.syncs.lock().await.push(sync);
    }

    pub async fn seed_collection(&self, collection: Collection) {
        self.collections.lock().await.push(collection);
    }
}

#[async_trait]
impl SyncRepository for InMemorySyncRepository {
    async fn get_sync(&self, sync_id: SyncId) -> anyhow::Result<Option<Sync>> {
        Ok(self.syncs.lock().await.iter().find(|s| s.id == sync_id).cloned())
    }

    async fn get_collection(&self, collection_id: uuid::Uuid) -> anyhow::Result<Option<Collection>> {
        Ok(self.collections.lock().await.iter().find(|c| c.id == collection_id).cloned())
    }

    async fn get_active_job(&self, sync_id: SyncId) -> anyhow::Result<Option<SyncJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .find(|j| j.sync_id == sync_id && !j.status.is_terminal())
            .cloned())
    }

    async fn insert_job(&self, job: SyncJob) -> anyhow::Result<()> {
        self.jobs.lock().await.push(job);
        Ok(())
    }

    async fn get_job(&self, job_id: SyncJobId) -> anyhow::Result<Option<SyncJob>> {
        Ok(self.jobs.lock().await.iter().find(|j| j.id == job_id).cloned())
    }

    async fn update_job(&self, job: SyncJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(existing) = jobs.iter_mut().find(|j| j.id == job.id) {
            *existing = job;
        } else {
            jobs.push(job);
        }
        Ok(())
    }

    async fn list_active_jobs(&self) -> anyhow::Result<Vec<SyncJob>> {
        Ok(self.jobs.lock().await.iter().filter(|j| !j.status.is_terminal()).cloned().collect())
    }

    async fn update_cursor(&self, sync_id: SyncId, cursor: Option<Cursor>) -> anyhow::Result<()> {
        let mut syncs = self.syncs.lock().await;
        if let Some(sync) = syncs.iter_mut().find(|s| s.id == sync_id) {
            sync.cursor = cursor;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::ids::{ConnectionId, OrganizationId};

    fn sample_sync() -> Sync {
        Sync {
            id: SyncId::new(),
            organization_id: OrganizationId::new(),
            connection_id: ConnectionId::new(),
            collection_id: uuid::Uuid::new_v4(),
            source_short_name: "asana".to_string(),
            cursor: None,
            schedule_cron: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn active_job_excludes_terminal_statuses() {
        let repo = InMemorySyncRepository::new();
        let sync = sample_sync();
        repo.seed_sync(sync.clone()).await;

        let mut job = SyncJob::new(sync.id, false);
        job.status = SyncJobStatus::Completed;
        repo.insert_job(job).await.unwrap();
        assert!(repo.get_active_job(sync.id).await.unwrap().is_none());

        let running = SyncJob::new(sync.id, false);
        repo.insert_job(running.clone()).await.unwrap();
        let active = repo.get_active_job(sync.id).await.unwrap().unwrap();
        assert_eq!(active.id, running.id);
    }

    #[tokio::test]
    async fn update_cursor_mutates_the_seeded_sync() {
        let repo = InMemorySyncRepository::new();
        let sync = sample_sync();
        repo.seed_sync(sync.clone()).await;

        repo.update_cursor(sync.id, Some(Cursor::GithubPushTimestamp("2026-01-01T00:00:00Z".into())))
            .await
            .unwrap();
        let updated = repo.get_sync(sync.id).await.unwrap().unwrap();
        assert!(updated.cursor.is_some());
    }
}
