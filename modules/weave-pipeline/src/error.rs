/// Per-entity failures are isolated by the pipeline; only `SyncFailure`
/// aborts the whole job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("entity processing failed: {0}")]
    EntityProcessing(String),
    #[error("sync failure: {0}")]
    SyncFailure(String),
}

impl From<weave_text::TextError> for PipelineError {
    fn from(e: weave_text::TextError) -> Self {
        PipelineError::EntityProcessing(e.to_string())
    }
}

/// Chunker/embedder failures are mostly per-entity (a bad doc, a flaky
/// API call), but a handful are invariant violations that become
/// `SyncFailureError` — model load failed, or the chunker's own
/// post-safety-net guarantee (every chunk ≤ 8192 tokens) didn't hold.
/// Those can't be "skip and continue"; something is broken for every
/// entity in the job, not just this one.
impl From<weave_processors::ProcessorError> for PipelineError {
    fn from(e: weave_processors::ProcessorError) -> Self {
        use weave_chunk::ChunkError;
        use weave_embed::EmbedError;
        use weave_processors::ProcessorError;
        match &e {
            ProcessorError::Chunk(ChunkError::InvariantViolated(_) | ChunkError::ModelLoad(_)) => {
                PipelineError::SyncFailure(e.to_string())
            }
            ProcessorError::Embed(EmbedError::ModelLoad(_) | EmbedError::EmptyText) => {
                PipelineError::SyncFailure(e.to_string())
            }
            _ => PipelineError::EntityProcessing(e.to_string()),
        }
    }
}

impl From<weave_destinations::DestinationError> for PipelineError {
    fn from(e: weave_destinations::DestinationError) -> Self {
        PipelineError::EntityProcessing(e.to_string())
    }
}

impl From<weave_rawdata::RawDataError> for PipelineError {
    fn from(e: weave_rawdata::RawDataError) -> Self {
        PipelineError::EntityProcessing(e.to_string())
    }
}

impl From<weave_download::DownloadError> for PipelineError {
    fn from(e: weave_download::DownloadError) -> Self {
        PipelineError::EntityProcessing(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
