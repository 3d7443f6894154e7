//! Error types for histogram production.

use thiserror::Error;

/// Errors that can occur while filling, storing or repairing histograms.
#[derive(Error, Debug)]
pub enum HistError {
    /// I/O error reading input or writing output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] tnp_core::Error),

    /// Expression parse error.
    #[error("expression error: {0}")]
    Expression(String),

    /// Invalid binning (edges, dimensions, value count).
    #[error("binning error: {0}")]
    Binning(String),

    /// A field referenced by an expression is absent from the event source.
    #[error("field not found: {0}")]
    MissingField(String),

    /// Event source failure (missing sample, unreadable file, bad column type).
    #[error("event source error: {0}")]
    Source(String),

    /// Invalid job sharding parameters.
    #[error("shard error: {0}")]
    Shard(String),

    /// Histogram store failure (schema, key or axis mismatch).
    #[error("histogram store error: {0}")]
    Store(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<parquet::errors::ParquetError> for HistError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        HistError::Source(format!("parquet: {e}"))
    }
}

impl From<arrow::error::ArrowError> for HistError {
    fn from(e: arrow::error::ArrowError) -> Self {
        HistError::Source(format!("arrow: {e}"))
    }
}

/// Result alias for histogram operations.
pub type Result<T> = std::result::Result<T, HistError>;
