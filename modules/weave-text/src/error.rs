#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {path}: {source}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("docx error: {0}")]
    Docx(String),

    #[error("csv error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("unsupported conversion for extension {0:?}")]
    UnsupportedExtension(Option<String>),

    #[error("ocr adapter error: {0}")]
    Ocr(String),
}

pub type Result<T> = std::result::Result<T, TextError>;
