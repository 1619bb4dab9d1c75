//! Collaborative session - the single writer for one document
//!
//! A session owns the document's content entity, its committed history and
//! its sequence counter. `submit` holds the session lock across
//! transform, apply and persist, so proposals for one document are processed
//! strictly one at a time while different sessions run in parallel.

use crate::apply::{apply, preflight, Applied};
use crate::config::{EngineConfig, RebaseWindow};
use crate::content::ContentEntity;
use crate::document::{DocumentId, DocumentMeta};
use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::store::{HistoryStore, StoredDocument};
use crate::transform::{transform_against_history, TransformLogEntry, TransformOutcome};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A successfully processed proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub document_id: DocumentId,
    /// Document version after the commit
    pub version: u64,
    /// Committed operations with their final positions and sequence numbers.
    /// Empty when the proposal was absorbed by history.
    pub operations: Vec<Operation>,
    pub changes: Vec<Applied>,
    pub log: Vec<TransformLogEntry>,
}

impl Commit {
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }
}

struct SessionState {
    entity: ContentEntity,
    history: Vec<Operation>,
}

/// One document's content, history and sequence counter
pub struct Session {
    id: DocumentId,
    config: EngineConfig,
    meta: RwLock<DocumentMeta>,
    state: Mutex<SessionState>,
    store: Option<Arc<dyn HistoryStore>>,
}

impl Session {
    /// Start a session for a fresh document at version 0
    pub fn new(id: DocumentId, entity: ContentEntity, config: EngineConfig) -> Self {
        let meta = DocumentMeta::new(id.clone(), entity.kind);
        Self {
            id,
            config,
            meta: RwLock::new(meta),
            state: Mutex::new(SessionState {
                entity,
                history: Vec::new(),
            }),
            store: None,
        }
    }

    /// Reopen a previously stored document
    pub fn restore(stored: StoredDocument, config: EngineConfig) -> Self {
        let mut history = stored.history;
        history.sort_by_key(|op| op.sequence_number);
        let mut session = Self {
            id: stored.meta.id.clone(),
            config,
            meta: RwLock::new(stored.meta),
            state: Mutex::new(SessionState {
                entity: stored.entity,
                history,
            }),
            store: None,
        };
        session.trim_history_now();
        session
    }

    /// Persist commits through `store` before they become visible
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn meta(&self) -> DocumentMeta {
        self.meta.read().clone()
    }

    /// Sequence number of the last commit
    pub fn version(&self) -> u64 {
        self.meta.read().version
    }

    /// Current content
    pub async fn snapshot(&self) -> ContentEntity {
        self.state.lock().await.entity.clone()
    }

    /// Committed operations after sequence number `after` that are still held in memory
    pub async fn history(&self, after: u64) -> Vec<Operation> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|op| op.sequence_number > after)
            .cloned()
            .collect()
    }

    /// Transform `proposal` against history, apply it, persist it and
    /// advance the sequence. A conflict or any failure leaves the document untouched.
    pub async fn submit(&self, proposal: Operation) -> Result<Commit> {
        proposal.validate()?;

        let mut state = self.state.lock().await;
        let version = self.version();

        if self.config.rebase_window == RebaseWindow::Unseen && proposal.sequence_number > version {
            return Err(Error::Validation(format!(
                "operation based on version {} but document is at {}",
                proposal.sequence_number, version
            )));
        }
        check_retained(&state.history, version, &proposal, self.config.rebase_window).map_err(|e| {
            warn!(document = %self.id, operation = %proposal.id, error = %e, "Base version outside retained history");
            e
        })?;
        preflight(&state.entity, &proposal)?;

        let rebased = match transform_against_history(&proposal, &state.history, self.config.rebase_window) {
            TransformOutcome::Rebased(rebased) => rebased,
            TransformOutcome::Conflict(info) => {
                warn!(
                    document = %self.id,
                    operation = %proposal.id,
                    user = %proposal.user_id,
                    kind = %info.kind,
                    "Rejected conflicting operation"
                );
                return Err(Error::Conflict(Box::new(info)));
            }
        };

        if rebased.is_noop() {
            debug!(document = %self.id, operation = %proposal.id, "Operation absorbed by history");
            return Ok(Commit {
                document_id: self.id.clone(),
                version,
                operations: Vec::new(),
                changes: Vec::new(),
                log: rebased.log,
            });
        }

        let mut operations = rebased.operations;
        for (i, op) in operations.iter_mut().enumerate() {
            op.sequence_number = version + 1 + i as u64;
        }

        let mut staged = state.entity.clone();
        let mut changes = Vec::with_capacity(operations.len());
        for op in &operations {
            changes.push(apply(&mut staged, op)?);
        }

        let new_version = version + operations.len() as u64;
        let mut meta = self.meta();
        meta.advance(new_version);

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&meta, &operations, &staged).await {
                warn!(document = %self.id, error = %e, "Failed to persist commit");
                return Err(match e {
                    Error::Persistence(_) => e,
                    other => Error::Persistence(other.to_string()),
                });
            }
        }

        state.entity = staged;
        state.history.extend(operations.iter().cloned());
        trim_history(&mut state.history, self.config.max_history);
        *self.meta.write() = meta;

        info!(
            document = %self.id,
            version = new_version,
            operations = operations.len(),
            user = %proposal.user_id,
            "Committed operation"
        );

        Ok(Commit {
            document_id: self.id.clone(),
            version: new_version,
            operations,
            changes,
            log: rebased.log,
        })
    }

    fn trim_history_now(&mut self) {
        let max = self.config.max_history;
        trim_history(&mut self.state.get_mut().history, max);
    }
}

/// Reject a proposal whose rebase would need commits already trimmed from history
fn check_retained(history: &[Operation], version: u64, proposal: &Operation, window: RebaseWindow) -> Result<()> {
    let retained_from = history.first().map_or(version + 1, |op| op.sequence_number);
    let base = proposal.sequence_number;
    let missing = match window {
        RebaseWindow::Unseen => base.saturating_add(1) < retained_from,
        RebaseWindow::Preceding => base > 1 && retained_from > 1,
    };

    if missing {
        return Err(Error::Validation(format!(
            "operation based on version {} needs history trimmed before version {}; resubmit against the current snapshot",
            base, retained_from
        )));
    }
    Ok(())
}

fn trim_history(history: &mut Vec<Operation>, max: usize) {
    if max > 0 && history.len() > max {
        let excess = history.len() - max;
        history.drain(..excess);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::content::EntityKind;
    use crate::store::StoreStats;
    use async_trait::async_trait;

    fn note_session(title: &str, config: EngineConfig) -> Session {
        let id = DocumentId::new("note:1").unwrap();
        let entity = ContentEntity::new(EntityKind::Note).with_field("title", title).unwrap();
        Session::new(id, entity, config)
    }

    async fn title(session: &Session) -> String {
        session.snapshot().await.text("title").unwrap().to_string()
    }

    struct FailingStore;

    #[async_trait]
    impl HistoryStore for FailingStore {
        async fn create(&self, _: &DocumentMeta, _: &ContentEntity) -> Result<()> {
            Ok(())
        }

        async fn append(&self, _: &DocumentMeta, _: &[Operation], _: &ContentEntity) -> Result<()> {
            Err(Error::Persistence("disk full".into()))
        }

        async fn load(&self, _: &DocumentId) -> Result<Option<StoredDocument>> {
            Ok(None)
        }

        async fn history(&self, _: &DocumentId, _: u64) -> Result<Vec<Operation>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _: &DocumentId) -> Result<bool> {
            Ok(false)
        }

        async fn list(&self, _: Option<&str>) -> Result<Vec<DocumentId>> {
            Ok(Vec::new())
        }

        async fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats::default())
        }
    }

    #[tokio::test]
    async fn test_commits_get_contiguous_sequence_numbers() {
        let session = note_session("hello", EngineConfig::default());

        let first = session.submit(Operation::insert("title", 5, " world")).await.unwrap();
        let second = session.submit(Operation::delete("title", 0, 1)).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.operations[0].sequence_number, 2);
        assert_eq!(title(&session).await, "ello world");

        let seqs: Vec<u64> = session.history(0).await.iter().map(|op| op.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(session.history(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_is_rejected_and_never_recorded() {
        let session = note_session("0123456789abcdefghij", EngineConfig::default());
        session.submit(Operation::delete("title", 5, 15)).await.unwrap();

        let err = session
            .submit(Operation::insert("title", 10, "x").at_sequence(2))
            .await
            .unwrap_err();

        assert_eq!(err.conflict().unwrap().kind, ConflictKind::InsertWithinDeletedRange);
        assert_eq!(session.version(), 1);
        assert_eq!(session.history(0).await.len(), 1);
        assert_eq!(title(&session).await, "01234fghij");
    }

    #[tokio::test]
    async fn test_unseen_window_rebases_concurrent_commit() {
        let config = EngineConfig {
            rebase_window: RebaseWindow::Unseen,
            ..EngineConfig::default()
        };
        let session = note_session("hello world", config);

        // both users last saw version 0
        session.submit(Operation::insert("title", 5, " there").by("bob")).await.unwrap();
        let commit = session.submit(Operation::insert("title", 11, "!").by("alice")).await.unwrap();

        assert_eq!(commit.operations[0].start_position, 17);
        assert_eq!(title(&session).await, "hello there world!");

        let err = session
            .submit(Operation::insert("title", 0, "x").at_sequence(9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_split_delete_commits_both_pieces() {
        let session = note_session("abcdefghij", EngineConfig::default());
        session.submit(Operation::insert("title", 5, "--")).await.unwrap();

        let commit = session
            .submit(Operation::delete("title", 2, 8).at_sequence(2))
            .await
            .unwrap();

        assert_eq!(commit.operations.len(), 2);
        assert_eq!(commit.version, 3);
        assert_eq!(title(&session).await, "ab--ij");
    }

    #[tokio::test]
    async fn test_absorbed_delete_is_a_noop_commit() {
        let session = note_session("abcdefghij", EngineConfig::default());
        session.submit(Operation::delete("title", 2, 8)).await.unwrap();

        let commit = session
            .submit(Operation::delete("title", 3, 5).at_sequence(2))
            .await
            .unwrap();

        assert!(commit.is_noop());
        assert_eq!(commit.version, 1);
        assert_eq!(session.version(), 1);
        assert_eq!(title(&session).await, "abij");
    }

    #[tokio::test]
    async fn test_validation_and_missing_path_short_circuit() {
        let session = note_session("abc", EngineConfig::default());

        let err = session.submit(Operation::insert("title", 0, "")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = session.submit(Operation::insert("content", 0, "x")).await.unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));

        let err = session
            .submit(Operation::attribute_change("due_date", "tomorrow"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttributeNotAllowed { .. }));
        assert_eq!(session.version(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_document_untouched() {
        let session = note_session("abc", EngineConfig::default()).with_store(Arc::new(FailingStore));

        let err = session.submit(Operation::insert("title", 3, "def")).await.unwrap_err();

        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(session.version(), 0);
        assert_eq!(title(&session).await, "abc");
        assert!(session.history(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let config = EngineConfig {
            max_history: 2,
            ..EngineConfig::default()
        };
        let session = note_session("", config);
        for _ in 0..5 {
            session.submit(Operation::insert("title", 0, "x")).await.unwrap();
        }

        let seqs: Vec<u64> = session.history(0).await.iter().map(|op| op.sequence_number).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(session.version(), 5);
    }

    #[tokio::test]
    async fn test_unseen_base_older_than_history_is_rejected() {
        let config = EngineConfig {
            max_history: 2,
            rebase_window: RebaseWindow::Unseen,
            ..EngineConfig::default()
        };
        let session = note_session("hello", config);
        for seq in 0..3 {
            session
                .submit(Operation::insert("title", 0, "ab").at_sequence(seq))
                .await
                .unwrap();
        }

        // Commit 1 is gone, so a version-0 base cannot be rebased
        let err = session
            .submit(Operation::insert("title", 5, "!"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(title(&session).await, "abababhello");
        assert_eq!(session.version(), 3);

        let commit = session
            .submit(Operation::insert("title", 7, "!").at_sequence(1))
            .await
            .unwrap();
        assert_eq!(commit.operations[0].start_position, 11);
        assert_eq!(title(&session).await, "abababhello!");
    }

    #[tokio::test]
    async fn test_preceding_base_needs_full_history() {
        let config = EngineConfig {
            max_history: 2,
            ..EngineConfig::default()
        };
        let session = note_session("", config);
        for _ in 0..3 {
            session.submit(Operation::insert("title", 0, "x")).await.unwrap();
        }

        let err = session
            .submit(Operation::insert("title", 0, "y").at_sequence(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(session.version(), 3);

        session.submit(Operation::insert("title", 0, "y")).await.unwrap();
        assert_eq!(title(&session).await, "yxxx");
    }

    #[tokio::test]
    async fn test_concurrent_submitters_are_serialized() {
        let session = Arc::new(note_session("", EngineConfig::default()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session
                    .submit(Operation::insert("title", 0, "x").by(format!("user-{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(session.version(), 10);
        assert_eq!(title(&session).await, "x".repeat(10));
        let seqs: Vec<u64> = session.history(0).await.iter().map(|op| op.sequence_number).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
    }
}
