//! Error types for the edit engine

use thiserror::Error;

use crate::format::FormatType;

/// Edit engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// The content does not parse under the expected grammar
    #[error("Malformed format: {0}")]
    MalformedFormat(String),

    /// A format with this type is already registered
    #[error("Format already registered: {0:?}")]
    FormatExists(FormatType),

    /// No format registered for this type
    #[error("Format not found: {0:?}")]
    FormatNotFound(FormatType),

    /// A file edit fails its structural invariants
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    /// Applying an edit batch failed; no file was changed
    #[error("Edit failed for '{path}': {reason}")]
    EditFailed {
        /// File whose edit failed
        path: String,
        /// Why it failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
