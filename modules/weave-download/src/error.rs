#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(Option<String>),

    #[error("file too large: {size} bytes exceeds the {limit} byte cap")]
    TooLarge { size: u64, limit: u64 },

    #[error("missing file extension on {0:?}")]
    MissingExtension(String),

    #[error("exhausted retries fetching {url}: {detail}")]
    RetriesExhausted { url: String, detail: String },
}

pub type Result<T> = std::result::Result<T, DownloadError>;
