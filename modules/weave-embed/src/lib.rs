//! Embedders: dense (OpenAI) and sparse (local BM25),
//! each a process-wide singleton shared across every sync job in the pod.

pub mod dense;
pub mod error;
pub mod sparse;

pub use dense::DenseEmbedder;
pub use error::{EmbedError, Result};
pub use sparse::{SparseEmbedder, SparseVector};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dense_embedder_rejects_empty_text() {
        let embedder = DenseEmbedder::new("test-key").unwrap();
        let err = embedder
            .embed_batch(&["".to_string()], 1536)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::EmptyText));
    }

    #[tokio::test]
    async fn dense_embedder_rejects_unsupported_vector_size() {
        let embedder = DenseEmbedder::new("test-key").unwrap();
        let err = embedder
            .embed_batch(&["hello".to_string()], 99999)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::UnsupportedVectorSize(99999)));
    }

    #[tokio::test]
    async fn sparse_embedder_rejects_empty_text() {
        let embedder = SparseEmbedder::new();
        let err = embedder.embed_batch(&["   ".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::EmptyText));
    }
}
