//! coedit Storage Backends
//!
//! Durable homes for document snapshots and their committed operation logs:
//! - Memory (default): Fast, volatile storage
//! - SQLite: Embedded persistence
//!
//! Both implement [`coedit_core::HistoryStore`].

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use coedit_core::Operation;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already stored: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence conflict: {0}")]
    Sequence(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<StorageError> for coedit_core::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AlreadyExists(id) => coedit_core::Error::DocumentExists(id),
            other => coedit_core::Error::Persistence(other.to_string()),
        }
    }
}

/// Operations are logged as MessagePack with field names, since their
/// tagged enums cannot be read back from positional encoding
pub(crate) fn encode_operation(op: &Operation) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec_named(op).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode_operation(bytes: &[u8]) -> Result<Operation, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Metadata and snapshots are kept as JSON
pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
