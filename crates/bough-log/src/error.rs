//! Error types for bough-log

use thiserror::Error;

/// Result type alias using bough-log Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when decoding log and stream records
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload record carried a type this crate does not know
    #[error("Unknown payload type: {0}")]
    UnknownPayload(String),

    /// A payload record was missing a required field
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl Error {
    /// Check if the record can be skipped without losing stream state
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::UnknownPayload(_))
    }
}
