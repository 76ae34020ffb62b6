#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("failed to load chunking model: {0}")]
    ModelLoad(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("post-safety-net invariant violated: {0}")]
    InvariantViolated(String),

    #[error("tree-sitter parse failed for language {0}")]
    ParseFailed(String),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
