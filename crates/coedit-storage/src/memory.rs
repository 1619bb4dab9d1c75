//! In-memory history store

use crate::{decode_json, decode_operation, encode_json, encode_operation, StorageError};
use async_trait::async_trait;
use coedit_core::document::matches_pattern;
use coedit_core::{ContentEntity, DocumentId, DocumentMeta, HistoryStore, Operation, StoreStats, StoredDocument};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

struct StoredEntry {
    meta: Vec<u8>,
    snapshot: Vec<u8>,
    /// (sequence number, encoded operation), ascending
    operations: Vec<(u64, Vec<u8>)>,
}

impl StoredEntry {
    fn size(&self) -> usize {
        self.meta.len() + self.snapshot.len() + self.operations.iter().map(|(_, op)| op.len()).sum::<usize>()
    }
}

/// In-memory history store
///
/// Fast, volatile storage suitable for development and tests.
/// Data is lost when the process exits.
pub struct MemoryStorage {
    data: DashMap<String, StoredEntry>,
    /// Total size tracking
    total_size: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            total_size: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for MemoryStorage {
    async fn create(&self, meta: &DocumentMeta, entity: &ContentEntity) -> coedit_core::Result<()> {
        let entry = StoredEntry {
            meta: encode_json(meta)?,
            snapshot: encode_json(entity)?,
            operations: Vec::new(),
        };

        match self.data.entry(meta.id.as_str().to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(meta.id.to_string()).into()),
            Entry::Vacant(slot) => {
                self.total_size.fetch_add(entry.size(), Ordering::Relaxed);
                slot.insert(entry);
                Ok(())
            }
        }
    }

    async fn append(
        &self,
        meta: &DocumentMeta,
        operations: &[Operation],
        snapshot: &ContentEntity,
    ) -> coedit_core::Result<()> {
        let meta_bytes = encode_json(meta)?;
        let snapshot_bytes = encode_json(snapshot)?;
        let encoded = operations
            .iter()
            .map(|op| Ok((op.sequence_number, encode_operation(op)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        let mut entry = self
            .data
            .get_mut(meta.id.as_str())
            .ok_or_else(|| StorageError::NotFound(meta.id.to_string()))?;

        let mut last = entry.operations.last().map_or(0, |(seq, _)| *seq);
        for (seq, _) in &encoded {
            if *seq <= last {
                return Err(StorageError::Sequence(format!(
                    "{} at sequence {} after {}",
                    meta.id, seq, last
                ))
                .into());
            }
            last = *seq;
        }

        let old_size = entry.size();
        entry.meta = meta_bytes;
        entry.snapshot = snapshot_bytes;
        entry.operations.extend(encoded);
        let new_size = entry.size();

        self.total_size.fetch_sub(old_size, Ordering::Relaxed);
        self.total_size.fetch_add(new_size, Ordering::Relaxed);

        trace!(document = %meta.id, version = meta.version, operations = operations.len(), "Appended to memory log");
        Ok(())
    }

    async fn load(&self, id: &DocumentId) -> coedit_core::Result<Option<StoredDocument>> {
        let Some(entry) = self.data.get(id.as_str()) else {
            return Ok(None);
        };

        let history = entry
            .operations
            .iter()
            .map(|(_, bytes)| decode_operation(bytes))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(StoredDocument {
            meta: decode_json(&entry.meta)?,
            entity: decode_json(&entry.snapshot)?,
            history,
        }))
    }

    async fn history(&self, id: &DocumentId, after: u64) -> coedit_core::Result<Vec<Operation>> {
        let entry = self
            .data
            .get(id.as_str())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let ops = entry
            .operations
            .iter()
            .filter(|(seq, _)| *seq > after)
            .map(|(_, bytes)| decode_operation(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    async fn delete(&self, id: &DocumentId) -> coedit_core::Result<bool> {
        match self.data.remove(id.as_str()) {
            Some((_, entry)) => {
                self.total_size.fetch_sub(entry.size(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, pattern: Option<&str>) -> coedit_core::Result<Vec<DocumentId>> {
        let mut ids = Vec::new();
        for entry in self.data.iter() {
            let key = entry.key();
            if pattern.map_or(true, |p| matches_pattern(key, p)) {
                if let Ok(id) = DocumentId::new(key.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    async fn stats(&self) -> coedit_core::Result<StoreStats> {
        Ok(StoreStats {
            document_count: self.data.len(),
            operation_count: self.data.iter().map(|entry| entry.operations.len()).sum(),
            total_size_bytes: self.total_size.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::{DocumentManager, EngineConfig, EntityKind};
    use std::sync::Arc;

    fn note(id: &str) -> (DocumentMeta, ContentEntity) {
        let id = DocumentId::new(id).unwrap();
        let entity = ContentEntity::new(EntityKind::Note)
            .with_field("title", "Mitosis")
            .unwrap()
            .with_field("content", "Cells divide.")
            .unwrap();
        (DocumentMeta::new(id, EntityKind::Note), entity)
    }

    #[tokio::test]
    async fn test_create_append_load() {
        let storage = MemoryStorage::new();
        let (mut meta, entity) = note("note:1");
        storage.create(&meta, &entity).await.unwrap();

        let op = Operation::insert("title", 7, " phases").at_sequence(1);
        let snapshot = entity.clone().with_field("title", "Mitosis phases").unwrap();
        meta.version = 1;
        storage.append(&meta, &[op.clone()], &snapshot).await.unwrap();

        let stored = storage.load(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored.meta.version, 1);
        assert_eq!(stored.entity, snapshot);
        assert_eq!(stored.history, vec![op]);
        assert!(storage.history(&meta.id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_twice_and_append_missing() {
        let storage = MemoryStorage::new();
        let (meta, entity) = note("note:2");
        storage.create(&meta, &entity).await.unwrap();

        assert!(matches!(
            storage.create(&meta, &entity).await,
            Err(coedit_core::Error::DocumentExists(_))
        ));

        let (missing, _) = note("note:missing");
        assert!(matches!(
            storage.append(&missing, &[], &entity).await,
            Err(coedit_core::Error::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_duplicate_sequence() {
        let storage = MemoryStorage::new();
        let (mut meta, entity) = note("note:dup");
        storage.create(&meta, &entity).await.unwrap();

        meta.version = 1;
        let op = Operation::insert("title", 0, "On ").at_sequence(1);
        storage.append(&meta, &[op.clone()], &entity).await.unwrap();

        meta.version = 2;
        let next = Operation::insert("title", 0, "x").at_sequence(2);
        assert!(matches!(
            storage.append(&meta, &[next, op], &entity).await,
            Err(coedit_core::Error::Persistence(_))
        ));

        let stored = storage.load(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored.meta.version, 1);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(storage.stats().await.unwrap().operation_count, 1);
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let storage = MemoryStorage::new();
        let (meta, entity) = note("note:3");
        storage.create(&meta, &entity).await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert!(stats.total_size_bytes > 0);

        assert!(storage.delete(&meta.id).await.unwrap());
        assert!(!storage.delete(&meta.id).await.unwrap());
        assert_eq!(storage.stats().await.unwrap().total_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_list_with_pattern() {
        let storage = MemoryStorage::new();

        for i in 0..5 {
            let (meta, entity) = note(&format!("note:{}", i));
            storage.create(&meta, &entity).await.unwrap();
        }
        for i in 0..3 {
            let (meta, entity) = note(&format!("lesson:{}", i));
            storage.create(&meta, &entity).await.unwrap();
        }

        assert_eq!(storage.list(Some("note:*")).await.unwrap().len(), 5);
        assert_eq!(storage.list(Some("lesson:*")).await.unwrap().len(), 3);
        assert_eq!(storage.list(None).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_manager_reopens_from_store() {
        let storage: Arc<dyn HistoryStore> = Arc::new(MemoryStorage::new());
        let (meta, entity) = note("note:4");

        let manager = DocumentManager::with_store(EngineConfig::default(), storage.clone());
        manager.create(meta.id.clone(), entity).await.unwrap();
        manager
            .submit(&meta.id, Operation::insert("content", 13, " Twice."))
            .await
            .unwrap();

        let reopened = DocumentManager::with_store(EngineConfig::default(), storage.clone());
        let session = reopened.open(&meta.id).await.unwrap();
        assert_eq!(session.version(), 1);
        assert_eq!(
            session.snapshot().await.text("content").unwrap(),
            "Cells divide. Twice."
        );
        assert_eq!(reopened.history(&meta.id, 0).await.unwrap().len(), 1);
        assert_eq!(storage.stats().await.unwrap().operation_count, 1);
    }
}
