//! Qdrant chunk+embed processor: fans one entity out into N
//! child entities, one per chunk, suffixed `#chunk_{i}` and carrying
//! `original_entity_id` so a later `bulk_delete_by_parent` can remove
//! every chunk of a superseded entity in one call.

use async_trait::async_trait;
use weave_chunk::{CodeChunker, SemanticChunker, SemanticChunkerConfig};
use weave_embed::{DenseEmbedder, SparseEmbedder};
use weave_types::entity::{Entity, Vector};

use crate::chunking::chunk_entity;
use crate::error::Result;
use crate::ContentProcessor;

pub struct QdrantChunkEmbedProcessor {
    semantic: SemanticChunker,
    code: CodeChunker,
    dense: DenseEmbedder,
    sparse: SparseEmbedder,
    vector_size: u32,
}

impl QdrantChunkEmbedProcessor {
    pub fn new(dense: DenseEmbedder, sparse: SparseEmbedder, vector_size: u32) -> weave_chunk::Result<Self> {
        Ok(Self {
            semantic: SemanticChunker::new(SemanticChunkerConfig::default())?,
            code: CodeChunker::new(),
            dense,
            sparse,
            vector_size,
        })
    }
}

#[async_trait]
impl ContentProcessor for QdrantChunkEmbedProcessor {
    async fn process(&self, entity: Entity) -> Result<Vec<Entity>> {
        let chunks = match chunk_entity(&entity, &self.semantic, &self.code).await? {
            Some(chunks) => chunks,
            None => return Ok(Vec::new()),
        };
        if chunks.is_empty() {
            return Ok(vec![entity]);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let dense_vectors = self.dense.embed_batch(&texts, self.vector_size).await?;
        let sparse_vectors = self.sparse.embed_batch(&texts).await?;

        let original_id = entity.entity_id.clone();
        let out = chunks
            .into_iter()
            .zip(dense_vectors)
            .zip(sparse_vectors)
            .enumerate()
            .map(|(i, ((chunk, dense), sparse))| {
                let mut child = entity.clone();
                child.entity_id = format!("{original_id}#chunk_{i}");
                child.textual_representation = Some(chunk.text);
                child.system_metadata.chunk_index = Some(i as u32);
                child.system_metadata.original_entity_id = Some(original_id.clone());
                child.system_metadata.vectors = vec![
                    Vector::Dense(dense),
                    Vector::Sparse(weave_types::entity::SparseVector {
                        indices: sparse.indices,
                        values: sparse.values,
                    }),
                ];
                child
            })
            .collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_suffix_format_matches_spec() {
        let original_id = "asana_task:123";
        let suffixed = format!("{original_id}#chunk_{}", 2);
        assert_eq!(suffixed, "asana_task:123#chunk_2");
    }
}
