#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage url: {0}")]
    InvalidUrl(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("object not found: {0}")]
    NotFound(String),
}

impl From<object_store::Error> for StorageError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
