//! Raw / text-only / no-op processor: used by archival and
//! plain-storage destinations that want the entity as-is, with no
//! chunking or embedding.

use async_trait::async_trait;
use weave_types::entity::Entity;

use crate::error::Result;
use crate::ContentProcessor;

pub struct RawProcessor;

#[async_trait]
impl ContentProcessor for RawProcessor {
    async fn process(&self, entity: Entity) -> Result<Vec<Entity>> {
        Ok(vec![entity])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::entity::EntityKind;

    #[tokio::test]
    async fn raw_processor_passes_entity_through_unchanged() {
        let entity = Entity::new("1", "asana", EntityKind::Deletion);
        let out = RawProcessor.process(entity.clone()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_id, entity.entity_id);
    }
}
