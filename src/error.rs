//! Error types for the chat-prep library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the application.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the chat-prep library.
///
/// The taxonomy mirrors how callers are expected to react: a missing source is
/// actionable and stops ingestion, a query timeout is a distinct status the
/// caller can narrow criteria for, and everything else is an internal failure.
#[derive(Error, Debug)]
pub enum ChatPrepError {
    /// Source chat.db missing or unreadable. Ingestion does not proceed and
    /// the checkpoint is left untouched.
    #[error("No accessible source database at {0}")]
    SourceUnavailable(PathBuf),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A batch failed mid-ingest. Prior committed batches are retained and
    /// the checkpoint still points at the last good batch.
    #[error("Ingestion aborted: {0}")]
    Ingest(String),

    /// Streaming or advanced search exceeded its wall-clock bound.
    #[error("Search timed out after {0} seconds; narrow the criteria and retry")]
    QueryTimeout(u64),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with `ChatPrepError`
pub type Result<T> = std::result::Result<T, ChatPrepError>;

impl From<anyhow::Error> for ChatPrepError {
    fn from(err: anyhow::Error) -> Self {
        ChatPrepError::Other(err.to_string())
    }
}
