//! Sync Multiplexer: state machine over a collection's
//! destination slots (`ACTIVE`/`SHADOW`/`DEPRECATED`). End-user queries
//! always hit `ACTIVE`; the entity pipeline consults this crate to
//! decide which slots a write should also reach.

pub mod error;
pub mod repository;

pub use error::{MultiplexError, Result};
pub use repository::{InMemorySlotRepository, SlotRepository};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use weave_types::ids::{SyncId, SyncJobId};
use weave_types::sync::{DestinationRole, DestinationSlot, Sync};

/// Starts a replay job that streams archived entities from the raw-data
/// service through the pipeline into a newly forked slot.
/// Implemented by the orchestrator/pipeline layer and injected here so
/// this crate never depends on them directly.
#[async_trait]
pub trait ReplayRunner: Send + Sync {
    async fn start_replay(&self, sync: &Sync, target_slot: &DestinationSlot) -> anyhow::Result<SyncJobId>;
}

/// Starts a forced full sync ahead of a fork.
#[async_trait]
pub trait FullSyncStarter: Send + Sync {
    async fn start_full_sync(&self, sync_id: SyncId) -> anyhow::Result<SyncJobId>;
}

pub struct ForkOutcome {
    pub slot: DestinationSlot,
    pub replay_job_id: Option<SyncJobId>,
}

pub struct SyncMultiplexer {
    repo: Arc<dyn SlotRepository>,
}

impl SyncMultiplexer {
    pub fn new(repo: Arc<dyn SlotRepository>) -> Self {
        Self { repo }
    }

    /// Creates a SHADOW slot for `sync`'s collection, validating that at
    /// most one SHADOW slot exists at a time. If `replay_from_arf` and a
    /// `replay_runner` is given, also kicks off a replay job.
    pub async fn fork(
        &self,
        sync: &Sync,
        destination_type: String,
        config: serde_json::Value,
        replay_from_arf: bool,
        replay_runner: Option<&dyn ReplayRunner>,
    ) -> Result<ForkOutcome> {
        let existing = self.repo.list_slots(sync.collection_id).await?;
        if existing.iter().any(|s| s.role == DestinationRole::Shadow) {
            return Err(MultiplexError::ShadowSlotAlreadyExists(sync.collection_id));
        }

        let slot = DestinationSlot {
            id: uuid::Uuid::new_v4(),
            collection_id: sync.collection_id,
            destination_type,
            role: DestinationRole::Shadow,
            config,
            created_at: Utc::now(),
        };
        self.repo.insert_slot(slot.clone()).await?;

        let replay_job_id = match (replay_from_arf, replay_runner) {
            (true, Some(runner)) => Some(runner.start_replay(sync, &slot).await?),
            _ => None,
        };

        Ok(ForkOutcome { slot, replay_job_id })
    }

    /// Atomically promotes `new_active_id` to ACTIVE, demoting the prior
    /// ACTIVE slot (if any) to DEPRECATED. `new_active_id` must currently
    /// be SHADOW.
    pub async fn switch(&self, collection_id: uuid::Uuid, new_active_id: uuid::Uuid) -> Result<()> {
        let slots = self.repo.list_slots(collection_id).await?;
        let target = slots
            .iter()
            .find(|s| s.id == new_active_id)
            .ok_or(MultiplexError::SlotNotFound(new_active_id))?;
        if target.role != DestinationRole::Shadow {
            return Err(MultiplexError::SwitchTargetNotShadow);
        }
        self.repo.switch_active(collection_id, new_active_id).await?;
        Ok(())
    }

    /// Forces a full sync so the raw-data archive is current before a
    /// fork replays from it.
    pub async fn resync_from_source(&self, sync_id: SyncId, starter: &dyn FullSyncStarter) -> Result<SyncJobId> {
        Ok(starter.start_full_sync(sync_id).await?)
    }

    /// Ordered ACTIVE, SHADOW, DEPRECATED.
    pub async fn list_destinations(&self, collection_id: uuid::Uuid) -> Result<Vec<DestinationSlot>> {
        let mut slots = self.repo.list_slots(collection_id).await?;
        slots.sort_by_key(|s| match s.role {
            DestinationRole::Active => 0,
            DestinationRole::Shadow => 1,
            DestinationRole::Deprecated => 2,
        });
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sync(collection_id: uuid::Uuid) -> Sync {
        Sync {
            id: SyncId::new(),
            organization_id: weave_types::ids::OrganizationId::new(),
            connection_id: weave_types::ids::ConnectionId::new(),
            collection_id,
            source_short_name: "asana".to_string(),
            cursor: None,
            schedule_cron: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn fork_creates_a_shadow_slot() {
        let repo = Arc::new(InMemorySlotRepository::new());
        let mux = SyncMultiplexer::new(repo);
        let sync = sample_sync(uuid::Uuid::new_v4());
        let outcome = mux.fork(&sync, "qdrant".to_string(), serde_json::json!({}), false, None).await.unwrap();
        assert_eq!(outcome.slot.role, DestinationRole::Shadow);
        assert!(outcome.replay_job_id.is_none());
    }

    #[tokio::test]
    async fn fork_rejects_a_second_shadow_slot() {
        let repo = Arc::new(InMemorySlotRepository::new());
        let mux = SyncMultiplexer::new(repo);
        let sync = sample_sync(uuid::Uuid::new_v4());
        mux.fork(&sync, "qdrant".to_string(), serde_json::json!({}), false, None).await.unwrap();
        let err = mux.fork(&sync, "qdrant".to_string(), serde_json::json!({}), false, None).await.unwrap_err();
        assert!(matches!(err, MultiplexError::ShadowSlotAlreadyExists(_)));
    }

    #[tokio::test]
    async fn switch_promotes_shadow_and_deprecates_active() {
        let repo = Arc::new(InMemorySlotRepository::new());
        let mux = SyncMultiplexer::new(repo.clone());
        let collection_id = uuid::Uuid::new_v4();
        let sync = sample_sync(collection_id);

        let active_slot = DestinationSlot {
            id: uuid::Uuid::new_v4(),
            collection_id,
            destination_type: "qdrant".to_string(),
            role: DestinationRole::Active,
            config: serde_json::json!({}),
            created_at: Utc::now(),
        };
        repo.insert_slot(active_slot.clone()).await.unwrap();
        let outcome = mux.fork(&sync, "vespa".to_string(), serde_json::json!({}), false, None).await.unwrap();

        mux.switch(collection_id, outcome.slot.id).await.unwrap();

        let slots = mux.list_destinations(collection_id).await.unwrap();
        assert_eq!(slots[0].id, outcome.slot.id);
        assert_eq!(slots[0].role, DestinationRole::Active);
        assert!(slots.iter().any(|s| s.id == active_slot.id && s.role == DestinationRole::Deprecated));
    }

    #[tokio::test]
    async fn switch_rejects_a_non_shadow_target() {
        let repo = Arc::new(InMemorySlotRepository::new());
        let mux = SyncMultiplexer::new(repo.clone());
        let collection_id = uuid::Uuid::new_v4();
        let active_slot = DestinationSlot {
            id: uuid::Uuid::new_v4(),
            collection_id,
            destination_type: "qdrant".to_string(),
            role: DestinationRole::Active,
            config: serde_json::json!({}),
            created_at: Utc::now(),
        };
        repo.insert_slot(active_slot.clone()).await.unwrap();
        let err = mux.switch(collection_id, active_slot.id).await.unwrap_err();
        assert!(matches!(err, MultiplexError::SwitchTargetNotShadow));
    }
}
