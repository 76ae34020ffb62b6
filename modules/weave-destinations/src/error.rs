#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("qdrant error: {0}")]
    Qdrant(String),
    #[error("vector_size is required for vector destinations")]
    MissingVectorSize,
    #[error(transparent)]
    Processor(#[from] weave_processors::ProcessorError),
}

pub type Result<T> = std::result::Result<T, DestinationError>;
