//! Error types for fallguard-pd
//!
//! Module-specific error types using thiserror for clear error propagation.
//! Most of these are logged and absorbed by the long-running loops rather than
//! surfaced to a caller: a failing source, store or bot never stops other pipelines.

use thiserror::Error;

/// Main error type for the pipeline daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capture device or URL failed to open
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A frame could not be read or decoded (transient)
    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    /// Track lacks the joints needed for a posture estimate
    #[error("Insufficient keypoints for track {0}")]
    InsufficientKeypoints(i64),

    /// Pose oracle failed to load or to answer
    #[error("Pose oracle error: {0}")]
    Oracle(String),

    /// Snapshot, clip or event write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Notification send or poll failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Resolve action for an event that is already resolved
    #[error("Event {0} already resolved")]
    DuplicateResolution(i64),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Shared library errors
    #[error(transparent)]
    Common(#[from] fallguard_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Request URLs can embed credentials, so they are stripped from the message
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Delivery(err.without_url().to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Persistence(format!("image encode: {}", err))
    }
}

/// Convenience Result type using fallguard-pd Error
pub type Result<T> = std::result::Result<T, Error>;
