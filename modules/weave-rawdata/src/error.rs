#[derive(Debug, thiserror::Error)]
pub enum RawDataError {
    #[error(transparent)]
    Storage(#[from] weave_storage::StorageError),
    #[error("failed to serialize entity envelope: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("entity not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RawDataError>;
