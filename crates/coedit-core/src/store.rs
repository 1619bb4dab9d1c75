//! Persistence seam for document snapshots and operation logs

use crate::content::ContentEntity;
use crate::document::{DocumentId, DocumentMeta};
use crate::error::Result;
use crate::operation::Operation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything needed to reopen a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub meta: DocumentMeta,
    pub entity: ContentEntity,
    /// Committed operations in ascending sequence order
    pub history: Vec<Operation>,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub document_count: usize,
    pub operation_count: usize,
    pub total_size_bytes: usize,
}

/// Durable home of committed operations.
///
/// `append` is called by the single writer of a document before the commit
/// becomes visible; an error there rejects the commit.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store a new document's initial snapshot
    async fn create(&self, meta: &DocumentMeta, entity: &ContentEntity) -> Result<()>;

    /// Record committed operations together with the snapshot they produce
    async fn append(&self, meta: &DocumentMeta, operations: &[Operation], snapshot: &ContentEntity) -> Result<()>;

    /// Load a document
    async fn load(&self, id: &DocumentId) -> Result<Option<StoredDocument>>;

    /// Committed operations with a sequence number strictly greater than `after`
    async fn history(&self, id: &DocumentId, after: u64) -> Result<Vec<Operation>>;

    /// Delete a document and its log
    async fn delete(&self, id: &DocumentId) -> Result<bool>;

    /// List document IDs matching a pattern
    async fn list(&self, pattern: Option<&str>) -> Result<Vec<DocumentId>>;

    /// Get store statistics
    async fn stats(&self) -> Result<StoreStats>;
}
