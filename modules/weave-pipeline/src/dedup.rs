//! Per-sync dedup index: maps `entity_id` to the
//! content hash last persisted for it, scoped to one sync (not one job —
//! it has to survive across job runs to detect unchanged entities).

use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait DedupIndex: Send + Sync {
    async fn get(&self, entity_id: &str) -> Option<String>;
    async fn set(&self, entity_id: &str, hash: &str);
    async fn remove(&self, entity_id: &str);
}

/// In-memory dedup index for tests and single-pod dev deployments — real
/// deployments back this with the same Postgres table the sync/job rows
/// live in.
#[derive(Default)]
pub struct InMemoryDedupIndex {
    hashes: DashMap<String, String>,
}

impl InMemoryDedupIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupIndex for InMemoryDedupIndex {
    async fn get(&self, entity_id: &str) -> Option<String> {
        self.hashes.get(entity_id).map(|v| v.clone())
    }

    async fn set(&self, entity_id: &str, hash: &str) {
        self.hashes.insert(entity_id.to_string(), hash.to_string());
    }

    async fn remove(&self, entity_id: &str) {
        self.hashes.remove(entity_id);
    }
}

/// The four non-skip outcomes of the dedup decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Insert,
    Update,
    Keep,
    Delete,
}

pub async fn decide(index: &dyn DedupIndex, entity_id: &str, is_deletion: bool, new_hash: &str) -> DedupDecision {
    if is_deletion {
        return DedupDecision::Delete;
    }
    match index.get(entity_id).await {
        None => DedupDecision::Insert,
        Some(prev) if prev == new_hash => DedupDecision::Keep,
        Some(_) => DedupDecision::Update,
    }
}

/// Content hash over an entity's hashable fields: its embeddable fields
/// minus any flagged `unhashable`, plus `name` since
/// that's the one commonly-renamed field every entity carries regardless
/// of source-specific schema.
pub fn compute_hash(entity: &weave_types::Entity) -> String {
    let unhashable = entity.unhashable_fields();
    let mut buf = String::new();
    if let Some(name) = &entity.name {
        buf.push_str(name);
    }
    for (field, value) in entity.embeddable_fields() {
        if !unhashable.contains(&field) {
            buf.push('\u{1}');
            buf.push_str(field);
            buf.push('\u{1}');
            buf.push_str(&value);
        }
    }
    weave_types::hash::content_hash_hex(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::entity::{AsanaTaskFields, Entity, EntityKind};

    fn task(name: &str, notes: &str) -> Entity {
        Entity::new(
            "1",
            "asana",
            EntityKind::AsanaTask(AsanaTaskFields {
                gid: "1".into(),
                name: name.into(),
                notes: Some(notes.into()),
                completed: false,
                assignee_name: None,
                project_gid: "p".into(),
                due_on: None,
                permalink_url: Some("https://app.asana.com/0/1/1".into()),
            }),
        )
    }

    #[test]
    fn hash_is_stable_for_identical_content() {
        assert_eq!(compute_hash(&task("a", "b")), compute_hash(&task("a", "b")));
    }

    #[test]
    fn hash_changes_when_notes_change() {
        assert_ne!(compute_hash(&task("a", "b")), compute_hash(&task("a", "c")));
    }

    #[tokio::test]
    async fn decide_reports_insert_then_keep_then_update() {
        let index = InMemoryDedupIndex::new();
        let hash_a = compute_hash(&task("a", "b"));
        assert_eq!(decide(&index, "1", false, &hash_a).await, DedupDecision::Insert);
        index.set("1", &hash_a).await;
        assert_eq!(decide(&index, "1", false, &hash_a).await, DedupDecision::Keep);
        let hash_b = compute_hash(&task("a", "c"));
        assert_eq!(decide(&index, "1", false, &hash_b).await, DedupDecision::Update);
    }

    #[tokio::test]
    async fn decide_reports_delete_for_deletion_events_regardless_of_index() {
        let index = InMemoryDedupIndex::new();
        assert_eq!(decide(&index, "1", true, "anything").await, DedupDecision::Delete);
    }
}
