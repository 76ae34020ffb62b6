#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("empty text passed to embedder — programming error")]
    EmptyText,

    #[error("failed to load sparse embedding model: {0}")]
    ModelLoad(String),

    #[error("sparse inference failed: {0}")]
    Inference(String),

    #[error("unsupported collection vector_size: {0}")]
    UnsupportedVectorSize(u32),
}

pub type Result<T> = std::result::Result<T, EmbedError>;
