/// Shared error taxonomy. Individual crates wrap this or define
/// their own narrower enum and convert into it at the boundary where a
/// caller only cares about the coarse category.
#[derive(Debug, thiserror::Error)]
pub enum WeaveError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("source rate limit exceeded for {source_short_name}, retry after {retry_after_secs}s")]
    SourceRateLimitExceeded {
        source_short_name: String,
        retry_after_secs: u64,
    },

    #[error("token refresh failed for connection {connection_id}: {reason}")]
    TokenRefreshError {
        connection_id: String,
        reason: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// A single entity failed; the pipeline counts it as skipped and continues.
    #[error("entity processing error: {0}")]
    EntityProcessingError(String),

    /// Invariant violation or fatal infrastructure failure; fails the whole job.
    #[error("sync failure: {0}")]
    SyncFailureError(String),

    #[error("invalid state: {0}")]
    InvalidStateError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WeaveError>;
