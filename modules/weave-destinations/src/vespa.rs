//! Vespa destination: no mainstream Vespa Rust client exists,
//! so this is a hand-rolled `reqwest` feed client in the same
//! build-your-own-vendor-client idiom as the workspace's other thin HTTP
//! wrappers (bearer/basic auth, one struct per endpoint response).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weave_embed::DenseEmbedder;
use weave_processors::{ContentProcessor, VespaChunkEmbedProcessor};
use weave_types::entity::{Entity, Vector};

use crate::error::{DestinationError, Result};
use crate::Destination;

pub struct VespaDestination {
    client: reqwest::Client,
    endpoint: String,
    namespace: String,
    document_type: String,
    processor: Arc<VespaChunkEmbedProcessor>,
}

impl VespaDestination {
    pub fn new(endpoint: String, namespace: String, document_type: String, dense: DenseEmbedder, vector_size: u32) -> Result<Self> {
        let processor = VespaChunkEmbedProcessor::new(dense, vector_size)
            .map_err(|e| DestinationError::Qdrant(e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            namespace,
            document_type,
            processor: Arc::new(processor),
        })
    }

    fn document_url(&self, entity_id: &str) -> String {
        format!(
            "{}/document/v1/{}/{}/docid/{}",
            self.endpoint,
            self.namespace,
            self.document_type,
            urlencode(entity_id)
        )
    }

    async fn feed_one(&self, entity: &Entity) -> Result<()> {
        let chunks = entity.system_metadata.chunk_texts.clone();
        let large_vectors: Vec<Vec<f32>> = entity
            .system_metadata
            .vectors
            .iter()
            .filter_map(|v| match v {
                Vector::Dense(d) => Some(d.clone()),
                _ => None,
            })
            .collect();
        let fields = VespaFields {
            entity_id: entity.entity_id.clone(),
            chunks,
            large_embeddings: large_vectors,
        };
        let body = VespaFeedRequest { fields };
        let resp = self
            .client
            .post(self.document_url(&entity.entity_id))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DestinationError::Api { status: status.as_u16(), body });
        }
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

#[async_trait]
impl Destination for VespaDestination {
    async fn bulk_upsert(&self, entities: Vec<Entity>) -> Result<()> {
        for entity in &entities {
            self.feed_one(entity).await?;
        }
        Ok(())
    }

    async fn bulk_delete(&self, entity_ids: &[String]) -> Result<()> {
        for id in entity_ids {
            let resp = self.client.delete(self.document_url(id)).send().await?;
            if !resp.status().is_success() && resp.status().as_u16() != 404 {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(DestinationError::Api { status, body });
            }
        }
        Ok(())
    }

    async fn bulk_delete_by_parent(&self, parent_ids: &[String]) -> Result<()> {
        // Vespa keeps entities 1:1, so a parent id is already the document id.
        self.bulk_delete(parent_ids).await
    }

    fn has_keyword_index(&self) -> bool {
        false
    }

    fn content_processor(&self) -> Arc<dyn ContentProcessor> {
        self.processor.clone()
    }
}

#[derive(Serialize)]
struct VespaFeedRequest {
    fields: VespaFields,
}

#[derive(Serialize, Deserialize)]
struct VespaFields {
    entity_id: String,
    chunks: Vec<String>,
    large_embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn urlencode_leaves_unreserved_characters_alone() {
        assert_eq!(urlencode("abc-123_XYZ.~"), "abc-123_XYZ.~");
    }
}
