//! Vespa chunk+embed processor: keeps entities 1:1 — chunk
//! texts, large dense vectors, and binary-packed small vectors for ANN all
//! live as arrays inside the single document.

use async_trait::async_trait;
use weave_chunk::{CodeChunker, SemanticChunker, SemanticChunkerConfig};
use weave_embed::DenseEmbedder;
use weave_types::entity::{Entity, Vector};

use crate::chunking::chunk_entity;
use crate::error::Result;
use crate::ContentProcessor;

pub struct VespaChunkEmbedProcessor {
    semantic: SemanticChunker,
    code: CodeChunker,
    dense: DenseEmbedder,
    large_vector_size: u32,
}

impl VespaChunkEmbedProcessor {
    pub fn new(dense: DenseEmbedder, large_vector_size: u32) -> weave_chunk::Result<Self> {
        Ok(Self {
            semantic: SemanticChunker::new(SemanticChunkerConfig::default())?,
            code: CodeChunker::new(),
            dense,
            large_vector_size,
        })
    }
}

#[async_trait]
impl ContentProcessor for VespaChunkEmbedProcessor {
    async fn process(&self, mut entity: Entity) -> Result<Vec<Entity>> {
        let chunks = match chunk_entity(&entity, &self.semantic, &self.code).await? {
            Some(chunks) => chunks,
            None => return Ok(Vec::new()),
        };
        if chunks.is_empty() {
            return Ok(vec![entity]);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let large_vectors = self.dense.embed_batch(&texts, self.large_vector_size).await?;
        // The small/binary ANN vector is derived from the already-computed
        // large embedding by packing its sign bits, not a second,
        // independently-truncated OpenAI call (matches the original's
        // `_pack_bits(large_embeddings)`).
        let small_vectors: Vec<Vec<u8>> = large_vectors.iter().map(|v| pack_binary_quantized(v)).collect();

        entity.system_metadata.chunk_texts = texts;
        entity.system_metadata.vectors = large_vectors
            .into_iter()
            .map(Vector::Dense)
            .chain(small_vectors.into_iter().map(|packed| {
                Vector::Sparse(weave_types::entity::SparseVector {
                    indices: Vec::new(),
                    values: packed.into_iter().map(|b| b as f32).collect(),
                })
            }))
            .collect();
        Ok(vec![entity])
    }
}

/// Sign-bit quantization: one bit per dimension, packed 8-to-a-byte. A
/// 768-dim vector packs to exactly 96 bytes.
fn pack_binary_quantized(vector: &[f32]) -> Vec<u8> {
    vector
        .chunks(8)
        .map(|byte_bits| {
            byte_bits
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, v)| if *v > 0.0 { acc | (1 << i) } else { acc })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_vector_is_one_eighth_the_length() {
        let vector = vec![1.0; 768];
        assert_eq!(pack_binary_quantized(&vector).len(), 96);
    }

    #[test]
    fn negative_values_clear_their_bit() {
        let vector = vec![-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0];
        let packed = pack_binary_quantized(&vector);
        assert_eq!(packed, vec![0b1010_1010]);
    }
}
