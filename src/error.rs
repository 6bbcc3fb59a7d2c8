//! Error types for the image-triage catalog.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    // Fail-fast ingestion errors: reported to the caller, operation aborted.
    #[error("root directory does not exist: {0}")]
    RootDirMissing(PathBuf),

    #[error("CSV file not found: {0}")]
    CsvNotFound(PathBuf),

    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
}
