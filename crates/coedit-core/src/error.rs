//! Error types for coedit core

use crate::conflict::ConflictInfo;
use crate::content::EntityKind;
use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Content path not found: {0}")]
    PathNotFound(String),

    #[error("Invalid position: {position} (content length {length})")]
    InvalidPosition { position: usize, length: usize },

    #[error("Conflict: {0}")]
    Conflict(Box<ConflictInfo>),

    #[error("Attribute not allowed on {kind}: {attribute}")]
    AttributeNotAllowed { kind: EntityKind, attribute: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Document already exists: {0}")]
    DocumentExists(String),
}

impl Error {
    /// The conflict carried by this error, if it is one
    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self {
            Error::Conflict(info) => Some(info),
            _ => None,
        }
    }
}

/// Result type alias for coedit core operations
pub type Result<T> = std::result::Result<T, Error>;
