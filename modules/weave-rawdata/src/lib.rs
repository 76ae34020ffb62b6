//! Raw Data Service: per-sync entity-level archive used
//! for destination forking/replay and full-sync stale cleanup.

pub mod error;

pub use error::{RawDataError, Result};

use dashmap::DashSet;

use bytes::Bytes;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use weave_storage::StorageBackend;
use weave_types::entity::Entity;
use weave_types::ids::{SyncId, SyncJobId};
use weave_types::sync::RawDataManifest;

const MANIFEST_KEY: &str = "manifest.json";
const ENTITIES_PREFIX: &str = "entities";
const FILES_PREFIX: &str = "files";

/// JSON envelope persisted alongside the entity so a later replay knows
/// how to reconstruct it without guessing. Rust's `Entity`
/// is already a single tagged-union type, so there's no class/module pair
/// to record — the envelope only needs the entity payload itself plus the
/// local-path-rehydration hint.
#[derive(Debug, Serialize, Deserialize)]
struct EntityEnvelope {
    entity: Entity,
    file_name: Option<String>,
}

/// Sanitizes `entity_id` into a filesystem-safe name and appends a short
/// MD5 suffix of the original id. The suffix is unconditional rather than
/// "only on collision" (spec's wording) — trivially cheap to compute and
/// removes the need to detect collisions at all.
pub fn safe_entity_id(entity_id: &str) -> String {
    let sanitized: String = entity_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let mut hasher = Md5::new();
    hasher.update(entity_id.as_bytes());
    let digest = hasher.finalize();
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{sanitized}_{suffix}")
}

/// Accumulates entity ids seen during one job run, for the full-sync
/// stale-entity cleanup pass. Backed by a `DashSet` rather
/// than a plain `HashSet` so the orchestrator's bounded worker pool
/// can share one tracker across concurrently processing
/// entities without a surrounding mutex.
pub struct SyncTracker {
    sync_job_id: SyncJobId,
    seen: DashSet<String>,
}

impl SyncTracker {
    pub fn mark_seen(&self, entity_id: &str) {
        self.seen.insert(entity_id.to_string());
    }
}

pub struct RawDataService {
    backend: StorageBackend,
}

impl RawDataService {
    /// `backend` should already be scoped to `raw/{sync_id}`; callers typically do `root.scoped(&format!("raw/{sync_id}"))`.
    pub fn new(backend: StorageBackend) -> Self {
        Self { backend }
    }

    pub fn start_sync_tracking(&self, sync_job_id: SyncJobId) -> SyncTracker {
        SyncTracker { sync_job_id, seen: DashSet::new() }
    }

    pub async fn upsert_entity(&self, entity: &Entity, tracker: Option<&SyncTracker>) -> Result<()> {
        self.upsert_entity_with_file(entity, None, tracker).await
    }

    pub async fn upsert_entity_with_file(
        &self,
        entity: &Entity,
        file: Option<(&str, Bytes)>,
        tracker: Option<&SyncTracker>,
    ) -> Result<()> {
        let safe_id = safe_entity_id(&entity.entity_id);
        let file_name = file.as_ref().map(|(name, _)| name.to_string());
        let envelope = EntityEnvelope { entity: entity.clone(), file_name: file_name.clone() };
        let json = serde_json::to_vec_pretty(&envelope)?;
        self.backend.put(&format!("{ENTITIES_PREFIX}/{safe_id}.json"), Bytes::from(json)).await?;

        if let Some((name, bytes)) = file {
            self.backend.put(&format!("{FILES_PREFIX}/{safe_id}_{name}"), bytes).await?;
        }
        if let Some(tracker) = tracker {
            tracker.mark_seen(&entity.entity_id);
        }
        self.bump_manifest(|m| {
            if !m.seen_entity_ids.contains(&entity.entity_id) {
                m.seen_entity_ids.push(entity.entity_id.clone());
                m.entity_count += 1;
            }
        })
        .await
    }

    pub async fn delete_entity(&self, entity_id: &str) -> Result<()> {
        let safe_id = safe_entity_id(entity_id);
        self.backend.delete(&format!("{ENTITIES_PREFIX}/{safe_id}.json")).await?;
        for key in self.backend.list(FILES_PREFIX).await? {
            if key.contains(&safe_id) {
                self.backend.delete(&key).await?;
            }
        }
        self.bump_manifest(|m| {
            m.seen_entity_ids.retain(|id| id != entity_id);
            m.entity_count = m.entity_count.saturating_sub(1);
        })
        .await
    }

    /// Replay iterator: reconstructs every archived entity, rehydrating
    /// `file.local_path` is left to the caller (needs a temp directory it
    /// doesn't own) — this only returns the typed entity plus the
    /// attached file's storage key, if any.
    pub async fn iter_entities(&self) -> Result<Vec<(Entity, Option<String>)>> {
        let mut out = Vec::new();
        for key in self.backend.list(ENTITIES_PREFIX).await? {
            let bytes = self.backend.get(&key).await?;
            let envelope: EntityEnvelope = serde_json::from_slice(&bytes)?;
            let file_key = envelope.file_name.as_ref().map(|name| {
                let safe_id = key
                    .rsplit('/')
                    .next()
                    .unwrap_or(&key)
                    .trim_end_matches(".json")
                    .to_string();
                format!("{FILES_PREFIX}/{safe_id}_{name}")
            });
            out.push((envelope.entity, file_key));
        }
        Ok(out)
    }

    pub async fn get_manifest(&self) -> Result<RawDataManifest> {
        match self.backend.get_opt(MANIFEST_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(empty_manifest(SyncId::new(), SyncJobId::new())),
        }
    }

    /// Deletes every archived entity not re-seen during the tracked job —
    /// called by the orchestrator after a full sync completes.
    pub async fn cleanup_stale_entities(&self, tracker: &SyncTracker) -> Result<u64> {
        let manifest = self.get_manifest().await?;
        let stale: Vec<String> = manifest
            .seen_entity_ids
            .iter()
            .filter(|id| !tracker.seen.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.delete_entity(id).await?;
        }
        self.bump_manifest(|m| {
            m.sync_job_id = tracker.sync_job_id;
        })
        .await?;
        Ok(stale.len() as u64)
    }

    async fn bump_manifest(&self, f: impl FnOnce(&mut RawDataManifest)) -> Result<()> {
        let mut manifest = self.get_manifest().await?;
        f(&mut manifest);
        let json = serde_json::to_vec_pretty(&manifest)?;
        self.backend.put(MANIFEST_KEY, Bytes::from(json)).await?;
        Ok(())
    }
}

fn empty_manifest(sync_id: SyncId, sync_job_id: SyncJobId) -> RawDataManifest {
    RawDataManifest {
        sync_id,
        sync_job_id,
        entity_count: 0,
        seen_entity_ids: Vec::new(),
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::entity::EntityKind;

    fn service() -> RawDataService {
        RawDataService::new(weave_storage::backend_from_url("memory://").unwrap().scoped("raw/test-sync"))
    }

    #[test]
    fn safe_entity_id_strips_unsafe_characters() {
        let safe = safe_entity_id("asana/task:123 name");
        assert!(safe.starts_with("asana_task_123_name_"));
    }

    #[test]
    fn safe_entity_id_is_deterministic() {
        assert_eq!(safe_entity_id("x"), safe_entity_id("x"));
    }

    #[tokio::test]
    async fn upsert_then_iter_round_trips_entity() {
        let service = service();
        let entity = Entity::new("1", "asana", EntityKind::Deletion);
        service.upsert_entity(&entity, None).await.unwrap();
        let all = service.iter_entities().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0.entity_id, "1");
    }

    #[tokio::test]
    async fn cleanup_stale_entities_removes_entities_not_reseen() {
        let service = service();
        let e1 = Entity::new("1", "asana", EntityKind::Deletion);
        let e2 = Entity::new("2", "asana", EntityKind::Deletion);
        service.upsert_entity(&e1, None).await.unwrap();
        service.upsert_entity(&e2, None).await.unwrap();

        let tracker = service.start_sync_tracking(SyncJobId::new());
        tracker.mark_seen("1");
        let removed = service.cleanup_stale_entities(&tracker).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = service.iter_entities().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0.entity_id, "1");
    }
}
