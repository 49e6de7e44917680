//! Error types for opalstats-core

use thiserror::Error;

/// Main error type for the opalstats-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XLSX writer error
    #[error("XLSX error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Report export error (unsupported format, empty dataset)
    #[error("{0}")]
    Export(String),
}

/// Result type alias for opalstats-core
pub type Result<T> = std::result::Result<T, Error>;
