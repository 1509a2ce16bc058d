use thiserror::Error;

/// Main error type for segstore operations
#[derive(Error, Debug)]
pub enum SegstoreError {
    #[error("segment size mismatch: file recorded {recorded}, open requested {requested}")]
    SegmentSizeMismatch { recorded: u32, requested: u32 },

    #[error("invalid segment size {0}: must be a multiple of 8 between 8 and 65536")]
    InvalidSegmentSize(u32),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("unique index violation on field {field}: multiple segment rows for one key")]
    UniquenessViolation { field: String },

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("unknown field {field} on file {file}")]
    UnknownField { file: String, field: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row store error: {0}")]
    Store(String),
}

/// Result type alias for segstore operations
pub type Result<T> = std::result::Result<T, SegstoreError>;

impl SegstoreError {
    /// Build a corruption error for a row that should exist but does not.
    pub fn missing_row(table: &str, detail: impl std::fmt::Display) -> Self {
        SegstoreError::Corruption(format!("missing row in {}: {}", table, detail))
    }
}
