#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Chunk(#[from] weave_chunk::ChunkError),
    #[error(transparent)]
    Embed(#[from] weave_embed::EmbedError),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
