//! SQLite history store

use crate::{decode_json, decode_operation, encode_json, encode_operation, StorageError};
use async_trait::async_trait;
use coedit_core::document::matches_pattern;
use coedit_core::{ContentEntity, DocumentId, DocumentMeta, HistoryStore, Operation, StoreStats, StoredDocument};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, trace};

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

/// SQLite history store
///
/// Embedded persistence suitable for single-node setups. Each append runs in
/// one transaction, so the log and the snapshot never disagree.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| StorageError::Connection(e.to_string()))?;
        debug!(path = %path.as_ref().display(), "Opened SQLite history store");
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                meta BLOB NOT NULL,
                snapshot BLOB NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );

            CREATE TABLE IF NOT EXISTS operations (
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                sequence_number INTEGER NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (document_id, sequence_number)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn read_history(conn: &Connection, id: &DocumentId, after: u64) -> Result<Vec<Operation>, StorageError> {
        let mut stmt = conn
            .prepare(
                "SELECT payload FROM operations
                 WHERE document_id = ?1 AND sequence_number > ?2
                 ORDER BY sequence_number ASC",
            )
            .map_err(db_err)?;

        let payloads = stmt
            .query_map(params![id.as_str(), after as i64], |row| row.get::<_, Vec<u8>>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        payloads.iter().map(|bytes| decode_operation(bytes)).collect()
    }
}

#[async_trait]
impl HistoryStore for SqliteStorage {
    async fn create(&self, meta: &DocumentMeta, entity: &ContentEntity) -> coedit_core::Result<()> {
        let meta_bytes = encode_json(meta)?;
        let snapshot = encode_json(entity)?;

        let conn = self.conn.lock();

        let inserted = conn
            .execute(
                r#"
                INSERT INTO documents (id, meta, snapshot, version, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO NOTHING
                "#,
                params![
                    meta.id.as_str(),
                    meta_bytes,
                    snapshot,
                    meta.version as i64,
                    meta.updated_at as i64
                ],
            )
            .map_err(db_err)?;

        if inserted == 0 {
            return Err(StorageError::AlreadyExists(meta.id.to_string()).into());
        }
        Ok(())
    }

    async fn append(
        &self,
        meta: &DocumentMeta,
        operations: &[Operation],
        snapshot: &ContentEntity,
    ) -> coedit_core::Result<()> {
        let meta_bytes = encode_json(meta)?;
        let snapshot_bytes = encode_json(snapshot)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let updated = tx
            .execute(
                "UPDATE documents SET meta = ?2, snapshot = ?3, version = ?4, updated_at = ?5 WHERE id = ?1",
                params![
                    meta.id.as_str(),
                    meta_bytes,
                    snapshot_bytes,
                    meta.version as i64,
                    meta.updated_at as i64
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StorageError::NotFound(meta.id.to_string()).into());
        }

        for op in operations {
            tx.execute(
                "INSERT INTO operations (document_id, sequence_number, payload) VALUES (?1, ?2, ?3)",
                params![meta.id.as_str(), op.sequence_number as i64, encode_operation(op)?],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;

        trace!(document = %meta.id, version = meta.version, operations = operations.len(), "Appended to SQLite log");
        Ok(())
    }

    async fn load(&self, id: &DocumentId) -> coedit_core::Result<Option<StoredDocument>> {
        let conn = self.conn.lock();

        let row: Option<(Vec<u8>, Vec<u8>)> = conn
            .query_row(
                "SELECT meta, snapshot FROM documents WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((meta_bytes, snapshot)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredDocument {
            meta: decode_json(&meta_bytes)?,
            entity: decode_json(&snapshot)?,
            history: Self::read_history(&conn, id, 0)?,
        }))
    }

    async fn history(&self, id: &DocumentId, after: u64) -> coedit_core::Result<Vec<Operation>> {
        let conn = self.conn.lock();

        let exists: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents WHERE id = ?1", params![id.as_str()], |row| {
                row.get(0)
            })
            .map_err(db_err)?;
        if exists == 0 {
            return Err(StorageError::NotFound(id.to_string()).into());
        }

        Ok(Self::read_history(&conn, id, after)?)
    }

    async fn delete(&self, id: &DocumentId) -> coedit_core::Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        tx.execute("DELETE FROM operations WHERE document_id = ?1", params![id.as_str()])
            .map_err(db_err)?;
        let affected = tx
            .execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(affected > 0)
    }

    async fn list(&self, pattern: Option<&str>) -> coedit_core::Result<Vec<DocumentId>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT id FROM documents ORDER BY updated_at DESC")
            .map_err(db_err)?;

        let ids: Vec<DocumentId> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .filter(|id| pattern.map_or(true, |p| matches_pattern(id, p)))
            .filter_map(|id| DocumentId::new(id).ok())
            .collect();

        Ok(ids)
    }

    async fn stats(&self) -> coedit_core::Result<StoreStats> {
        let conn = self.conn.lock();

        let document_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(db_err)?;

        let (operation_count, log_size): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM operations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;

        let snapshot_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(meta) + LENGTH(snapshot)), 0) FROM documents",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok(StoreStats {
            document_count: document_count as usize,
            operation_count: operation_count as usize,
            total_size_bytes: (log_size + snapshot_size) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::{DocumentManager, EngineConfig, EntityKind, StructureAction, StructureType, Value};
    use std::sync::Arc;

    fn quiz(id: &str) -> (DocumentMeta, ContentEntity) {
        let id = DocumentId::new(id).unwrap();
        let entity = ContentEntity::new(EntityKind::Quiz).with_field("title", "Genetics").unwrap();
        (DocumentMeta::new(id, EntityKind::Quiz), entity)
    }

    #[tokio::test]
    async fn test_sqlite_crud() {
        let storage = SqliteStorage::in_memory().unwrap();
        let (mut meta, entity) = quiz("quiz:sqlite");

        storage.create(&meta, &entity).await.unwrap();
        assert!(storage.create(&meta, &entity).await.is_err());

        let ops = vec![
            Operation::insert("title", 8, " quiz").at_sequence(1),
            Operation::attribute_change("passing_score", 80i64).at_sequence(2),
        ];
        let snapshot = entity
            .clone()
            .with_field("title", "Genetics quiz")
            .unwrap()
            .with_field("passing_score", 80i64)
            .unwrap();
        meta.version = 2;
        storage.append(&meta, &ops, &snapshot).await.unwrap();

        let stored = storage.load(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored.meta.version, 2);
        assert_eq!(stored.entity, snapshot);
        assert_eq!(stored.history, ops);
        assert_eq!(storage.history(&meta.id, 1).await.unwrap(), ops[1..].to_vec());

        assert!(storage.delete(&meta.id).await.unwrap());
        assert!(storage.load(&meta.id).await.unwrap().is_none());
        assert!(storage.history(&meta.id, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_rejects_duplicate_sequence() {
        let storage = SqliteStorage::in_memory().unwrap();
        let (mut meta, entity) = quiz("quiz:dup");
        storage.create(&meta, &entity).await.unwrap();

        meta.version = 1;
        let op = Operation::insert("title", 0, "Intro to ").at_sequence(1);
        storage.append(&meta, &[op.clone()], &entity).await.unwrap();

        // the whole second append rolls back
        meta.version = 2;
        let next = Operation::insert("title", 0, "x").at_sequence(2);
        assert!(storage.append(&meta, &[next, op], &entity).await.is_err());

        let stored = storage.load(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored.meta.version, 1);
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_list_pattern() {
        let storage = SqliteStorage::in_memory().unwrap();

        for i in 0..5 {
            let (meta, entity) = quiz(&format!("quiz:{}", i));
            storage.create(&meta, &entity).await.unwrap();
        }
        for i in 0..3 {
            let (meta, entity) = quiz(&format!("course_a:{}", i));
            storage.create(&meta, &entity).await.unwrap();
        }

        assert_eq!(storage.list(Some("quiz:*")).await.unwrap().len(), 5);
        assert_eq!(storage.list(Some("course_a:*")).await.unwrap().len(), 3);
        assert_eq!(storage.list(None).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coedit.db");
        let (meta, entity) = quiz("quiz:durable");

        {
            let store: Arc<dyn HistoryStore> = Arc::new(SqliteStorage::new(&path).unwrap());
            let manager = DocumentManager::with_store(EngineConfig::default(), store);
            manager.create(meta.id.clone(), entity).await.unwrap();
            let question = Value::object().with("prompt", "What is an allele?");
            manager
                .submit(
                    &meta.id,
                    Operation::structure_change(
                        StructureType::Questions,
                        StructureAction::Add { index: None, item: question },
                    ),
                )
                .await
                .unwrap();
        }

        let store: Arc<dyn HistoryStore> = Arc::new(SqliteStorage::new(&path).unwrap());
        let manager = DocumentManager::with_store(EngineConfig::default(), store.clone());
        let snapshot = manager.snapshot(&meta.id).await.unwrap();

        assert_eq!(
            snapshot.get("questions[0].prompt"),
            Some(&Value::from("What is an allele?"))
        );
        assert_eq!(manager.get(&meta.id).unwrap().version(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.operation_count, 1);
        assert!(stats.total_size_bytes > 0);
    }
}
