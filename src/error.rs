//! Unified error type for the upload and query pipelines.
//!
//! Ingestion-time errors (`UnsupportedFormat`, `PayloadTooLarge`, `Parse`)
//! never create a session. Query-time collaborator failures
//! (`EmbeddingUnavailable`, `ModelUnavailable`) leave the session intact so
//! the client can retry once the collaborator recovers.

use thiserror::Error;

/// Error taxonomy for the tablechat pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The uploaded file's extension is not in the allow-list.
    #[error("only .csv, .xls, and .xlsx files are supported (got .{0})")]
    UnsupportedFormat(String),

    /// The uploaded payload exceeds the configured size limit.
    #[error("file size {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The file could not be decoded despite an allowed extension.
    #[error("failed to parse file: {0}")]
    Parse(String),

    /// The embedding provider failed after retries.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The language model failed after retries.
    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    /// No session exists for the given room identifier.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors (temp-file spill).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
