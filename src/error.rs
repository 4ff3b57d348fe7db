//! Error types for Parsons Trace

use thiserror::Error;

/// Errors that can occur while loading, exporting, or aligning session data.
///
/// Feature extraction and validation never produce these; they describe bad
/// data as values instead.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to parse session payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Export error: {0}")]
    ExportError(String),
}
