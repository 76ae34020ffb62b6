#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from {source}: {detail}")]
    UnexpectedResponse { source: &'static str, detail: String },

    #[error("token error: {0}")]
    Token(#[from] weave_types::WeaveError),

    /// Per-item failure; the pipeline skips the item and continues the sync.
    #[error("{0}")]
    ItemFailed(String),

    /// Whole-sync failure; propagated up as `WeaveError::SyncFailureError`.
    #[error("fatal source error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;
