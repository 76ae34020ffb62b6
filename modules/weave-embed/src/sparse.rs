//! Sparse (BM25) embedder. Local inference via `fastembed`,
//! same lazy-singleton shape as `weave-chunk::SemanticChunker`.

use fastembed::{SparseEmbedding, SparseInitOptions, SparseModel, SparseTextEmbedding};
use tokio::sync::OnceCell;

use crate::error::{EmbedError, Result};

/// `fastembed` batches internally, but for a lot of texts we still chunk
/// the input ourselves so the tokio runtime gets a chance to yield
/// between CPU-bound inference calls rather than blocking for the
/// entire job in one shot.
const COOPERATIVE_BATCH_SIZE: usize = 200;

pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl From<SparseEmbedding> for SparseVector {
    fn from(e: SparseEmbedding) -> Self {
        Self { indices: e.indices, values: e.values }
    }
}

pub struct SparseEmbedder {
    model: OnceCell<SparseTextEmbedding>,
}

impl SparseEmbedder {
    pub fn new() -> Self {
        Self { model: OnceCell::new() }
    }

    async fn model(&self) -> Result<&SparseTextEmbedding> {
        self.model
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(|| {
                    SparseTextEmbedding::try_new(SparseInitOptions::new(SparseModel::SPLADEPPV1))
                })
                .await
                .map_err(|e| EmbedError::ModelLoad(e.to_string()))?
                .map_err(|e| EmbedError::ModelLoad(e.to_string()))
            })
            .await
    }

    /// Fails fast on any empty text, mirroring `DenseEmbedder`.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedError::EmptyText);
        }
        let model = self.model().await?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(COOPERATIVE_BATCH_SIZE) {
            let owned: Vec<String> = chunk.to_vec();
            let embeddings = model
                .embed(owned, None)
                .map_err(|e| EmbedError::Inference(e.to_string()))?;
            out.extend(embeddings.into_iter().map(SparseVector::from));
            tokio::task::yield_now().await;
        }
        Ok(out)
    }
}

impl Default for SparseEmbedder {
    fn default() -> Self {
        Self::new()
    }
}
