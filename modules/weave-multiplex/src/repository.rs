//! `SlotRepository` is the narrow DB-access boundary the multiplexer
//! calls across. Persistence itself is `weave-storage`'s/the
//! orchestrator's concern; this crate only needs atomic slot reads/writes.

use async_trait::async_trait;
use weave_types::sync::DestinationSlot;

#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn list_slots(&self, collection_id: uuid::Uuid) -> anyhow::Result<Vec<DestinationSlot>>;
    async fn insert_slot(&self, slot: DestinationSlot) -> anyhow::Result<()>;
    /// Atomically: old ACTIVE (if any) → DEPRECATED, `new_active_id` → ACTIVE.
    /// Implementations back this with a DB transaction so the
    /// exactly-one-ACTIVE invariant holds under concurrent callers.
    async fn switch_active(&self, collection_id: uuid::Uuid, new_active_id: uuid::Uuid) -> anyhow::Result<()>;
}

/// In-memory `SlotRepository` for tests and single-pod dev deployments —
/// same "trait + in-memory fake + real backend" shape as `weave-kv`'s
/// `KvStore`/`InMemoryKv` and `weave-storage`'s `StorageBackend`.
#[derive(Default)]
pub struct InMemorySlotRepository {
    slots: tokio::sync::Mutex<Vec<DestinationSlot>>,
}

impl InMemorySlotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotRepository for InMemorySlotRepository {
    async fn list_slots(&self, collection_id: uuid::Uuid) -> anyhow::Result<Vec<DestinationSlot>> {
        let slots = self.slots.lock().await;
        Ok(slots.iter().filter(|s| s.collection_id == collection_id).cloned().collect())
    }

    async fn insert_slot(&self, slot: DestinationSlot) -> anyhow::Result<()> {
        self.slots.lock().await.push(slot);
        Ok(())
    }

    async fn switch_active(&self, collection_id: uuid::Uuid, new_active_id: uuid::Uuid) -> anyhow::Result<()> {
        use weave_types::sync::DestinationRole;
        let mut slots = self.slots.lock().await;
        for slot in slots.iter_mut().filter(|s| s.collection_id == collection_id) {
            if slot.role == DestinationRole::Active {
                slot.role = DestinationRole::Deprecated;
            }
            if slot.id == new_active_id {
                slot.role = DestinationRole::Active;
            }
        }
        Ok(())
    }
}
