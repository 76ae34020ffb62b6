//! Qdrant destination: the official `qdrant-client` gRPC
//! client. Points are keyed by a deterministic UUID derived from
//! `entity_id` so `bulk_upsert` stays idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, Condition, DeletePointsBuilder, Filter, PointId, PointStruct,
    UpsertPointsBuilder, Value as QdrantValue, Vectors,
};
use qdrant_client::Qdrant;
use uuid::Uuid;
use weave_embed::{DenseEmbedder, SparseEmbedder};
use weave_processors::{ContentProcessor, QdrantChunkEmbedProcessor};
use weave_types::entity::{Entity, Vector};

use crate::error::{DestinationError, Result};
use crate::Destination;

pub struct QdrantDestination {
    client: Qdrant,
    collection_name: String,
    processor: Arc<QdrantChunkEmbedProcessor>,
}

impl QdrantDestination {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection_name: String,
        dense: DenseEmbedder,
        sparse: SparseEmbedder,
        vector_size: u32,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(|e| DestinationError::Qdrant(e.to_string()))?;
        let processor = QdrantChunkEmbedProcessor::new(dense, sparse, vector_size)
            .map_err(|e| DestinationError::Qdrant(e.to_string()))?;
        Ok(Self {
            client,
            collection_name,
            processor: Arc::new(processor),
        })
    }

    /// Qdrant point ids must be a u64 or UUID; entity ids are arbitrary
    /// source-specific strings, so we derive a stable v5 UUID from them.
    fn point_id_for(entity_id: &str) -> PointId {
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, entity_id.as_bytes());
        PointId {
            point_id_options: Some(PointIdOptions::Uuid(uuid.to_string())),
        }
    }
}

#[async_trait]
impl Destination for QdrantDestination {
    async fn bulk_upsert(&self, entities: Vec<Entity>) -> Result<()> {
        let points: Vec<PointStruct> = entities
            .iter()
            .filter_map(|entity| {
                let dense = entity.system_metadata.vectors.iter().find_map(|v| match v {
                    Vector::Dense(d) => Some(d.clone()),
                    _ => None,
                })?;
                let mut payload = std::collections::HashMap::new();
                payload.insert("entity_id".to_string(), QdrantValue::from(entity.entity_id.clone()));
                if let Some(parent) = &entity.system_metadata.original_entity_id {
                    payload.insert("original_entity_id".to_string(), QdrantValue::from(parent.clone()));
                }
                if let Some(text) = &entity.textual_representation {
                    payload.insert("text".to_string(), QdrantValue::from(text.clone()));
                }
                Some(PointStruct::new(Self::point_id_for(&entity.entity_id), Vectors::from(dense), payload))
            })
            .collect();

        if points.is_empty() {
            return Ok(());
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name.clone(), points))
            .await
            .map_err(|e| DestinationError::Qdrant(e.to_string()))?;
        Ok(())
    }

    async fn bulk_delete(&self, entity_ids: &[String]) -> Result<()> {
        let ids: Vec<PointId> = entity_ids.iter().map(|id| Self::point_id_for(id)).collect();
        self.client
            .delete_points(DeletePointsBuilder::new(self.collection_name.clone()).points(ids))
            .await
            .map_err(|e| DestinationError::Qdrant(e.to_string()))?;
        Ok(())
    }

    async fn bulk_delete_by_parent(&self, parent_ids: &[String]) -> Result<()> {
        let filter = Filter::must(parent_ids.iter().map(|id| Condition::matches("original_entity_id", id.clone())));
        self.client
            .delete_points(DeletePointsBuilder::new(self.collection_name.clone()).points(filter))
            .await
            .map_err(|e| DestinationError::Qdrant(e.to_string()))?;
        Ok(())
    }

    fn has_keyword_index(&self) -> bool {
        true
    }

    fn content_processor(&self) -> Arc<dyn ContentProcessor> {
        self.processor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_derivation_is_deterministic() {
        let a = QdrantDestination::point_id_for("asana_task:123");
        let b = QdrantDestination::point_id_for("asana_task:123");
        assert_eq!(a, b);
    }

    #[test]
    fn point_id_derivation_differs_per_entity() {
        let a = QdrantDestination::point_id_for("asana_task:123");
        let b = QdrantDestination::point_id_for("asana_task:124");
        assert_ne!(a, b);
    }
}
