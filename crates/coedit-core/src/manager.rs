//! Document Manager - handles session lifecycle and commit subscriptions

use crate::config::EngineConfig;
use crate::content::ContentEntity;
use crate::document::{matches_pattern, DocumentId, DocumentMeta};
use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::session::{Commit, Session};
use crate::store::HistoryStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Committed operations sent to subscribers
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub document_id: DocumentId,
    pub version: u64,
    pub user_id: String,
    pub operations: Vec<Operation>,
}

/// Document manager handles all open sessions and subscriptions
pub struct DocumentManager {
    /// Open sessions indexed by document ID
    sessions: DashMap<String, Arc<Session>>,
    /// Broadcast channel for commits
    update_sender: broadcast::Sender<CommitEvent>,
    config: EngineConfig,
    store: Option<Arc<dyn HistoryStore>>,
}

impl DocumentManager {
    /// Create an in-memory manager with default settings
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let (update_sender, _) = broadcast::channel(config.broadcast_capacity.max(1));

        Self {
            sessions: DashMap::new(),
            update_sender,
            config,
            store: None,
        }
    }

    /// Create a manager whose sessions persist through `store`
    pub fn with_store(config: EngineConfig, store: Arc<dyn HistoryStore>) -> Self {
        let mut manager = Self::with_config(config);
        manager.store = Some(store);
        manager
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn session(&self, id: DocumentId, entity: ContentEntity) -> Session {
        let session = Session::new(id, entity, self.config.clone());
        match &self.store {
            Some(store) => session.with_store(store.clone()),
            None => session,
        }
    }

    /// Create a new document holding `entity`
    pub async fn create(&self, id: DocumentId, entity: ContentEntity) -> Result<Arc<Session>> {
        let key = id.as_str().to_string();

        if let Some(store) = &self.store {
            if store.load(&id).await?.is_some() {
                return Err(Error::DocumentExists(key));
            }
        }

        let session = match self.sessions.entry(key.clone()) {
            Entry::Occupied(_) => return Err(Error::DocumentExists(key)),
            Entry::Vacant(slot) => slot.insert(Arc::new(self.session(id, entity))).value().clone(),
        };

        if let Some(store) = &self.store {
            let snapshot = session.snapshot().await;
            if let Err(e) = store.create(&session.meta(), &snapshot).await {
                warn!(document = %key, error = %e, "Failed to persist new document");
                self.sessions.remove(&key);
                return Err(e);
            }
        }

        info!(document = %key, kind = %session.meta().kind, "Created document");
        Ok(session)
    }

    /// Get an open session
    pub fn get(&self, id: &DocumentId) -> Result<Arc<Session>> {
        self.sessions
            .get(id.as_str())
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))
    }

    /// Get an open session, loading it from the store if needed
    pub async fn open(&self, id: &DocumentId) -> Result<Arc<Session>> {
        if let Ok(session) = self.get(id) {
            return Ok(session);
        }

        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;
        let stored = store
            .load(id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

        debug!(document = %id, version = stored.meta.version, "Restored document");
        let session = Session::restore(stored, self.config.clone()).with_store(store.clone());

        Ok(self
            .sessions
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(session))
            .value()
            .clone())
    }

    /// Submit a proposal to a document and publish the resulting commit
    pub async fn submit(&self, id: &DocumentId, proposal: Operation) -> Result<Commit> {
        let session = self.open(id).await?;
        let user_id = proposal.user_id.clone();
        let commit = session.submit(proposal).await?;

        if !commit.is_noop() {
            self.publish_update(CommitEvent {
                document_id: commit.document_id.clone(),
                version: commit.version,
                user_id,
                operations: commit.operations.clone(),
            });
        }

        Ok(commit)
    }

    /// Committed operations after sequence number `after`
    pub async fn history(&self, id: &DocumentId, after: u64) -> Result<Vec<Operation>> {
        match &self.store {
            Some(store) => {
                self.open(id).await?;
                store.history(id, after).await
            }
            None => Ok(self.get(id)?.history(after).await),
        }
    }

    /// Current content of a document
    pub async fn snapshot(&self, id: &DocumentId) -> Result<ContentEntity> {
        Ok(self.open(id).await?.snapshot().await)
    }

    /// Delete a document and its history
    pub async fn delete(&self, id: &DocumentId) -> Result<()> {
        let mut found = self.sessions.remove(id.as_str()).is_some();

        if let Some(store) = &self.store {
            found |= store.delete(id).await?;
        }

        if !found {
            return Err(Error::DocumentNotFound(id.to_string()));
        }

        info!(document = %id, "Deleted document");
        Ok(())
    }

    /// List open documents matching a pattern (glob syntax)
    pub fn list(&self, pattern: Option<&str>) -> Vec<DocumentMeta> {
        self.sessions
            .iter()
            .filter(|entry| pattern.map_or(true, |p| matches_pattern(entry.key(), p)))
            .map(|entry| entry.value().meta())
            .collect()
    }

    /// Subscribe to commits on every document
    pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
        self.update_sender.subscribe()
    }

    /// Publish a commit to all subscribers
    pub fn publish_update(&self, event: CommitEvent) {
        let _ = self.update_sender.send(event);
    }

    /// Get statistics
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            document_count: self.sessions.len(),
            subscriber_count: self.update_sender.receiver_count(),
            committed_operations: self.sessions.iter().map(|entry| entry.value().version()).sum(),
        }
    }
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager statistics
#[derive(Debug, Clone)]
pub struct ManagerStats {
    pub document_count: usize,
    pub subscriber_count: usize,
    pub committed_operations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::EntityKind;
    use crate::operation::{StructureAction, StructureType};
    use crate::value::Value;

    fn quiz() -> ContentEntity {
        ContentEntity::new(EntityKind::Quiz)
            .with_field("title", "Photosynthesis")
            .unwrap()
            .with_field("description", "Week 3")
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let manager = DocumentManager::new();
        let id = DocumentId::new("quiz:1").unwrap();

        manager.create(id.clone(), quiz()).await.unwrap();
        manager
            .submit(&id, Operation::insert("title", 14, " basics"))
            .await
            .unwrap();

        let snapshot = manager.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.text("title").unwrap(), "Photosynthesis basics");
        assert_eq!(manager.get(&id).unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let manager = DocumentManager::new();
        let id = DocumentId::new("quiz:2").unwrap();

        manager.create(id.clone(), quiz()).await.unwrap();
        assert!(matches!(
            manager.create(id, quiz()).await,
            Err(Error::DocumentExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let manager = DocumentManager::new();
        let id = DocumentId::new("quiz:missing").unwrap();

        assert!(matches!(
            manager.submit(&id, Operation::insert("title", 0, "x")).await,
            Err(Error::DocumentNotFound(_))
        ));
        assert!(manager.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_with_pattern() {
        let manager = DocumentManager::new();

        manager.create(DocumentId::new("quiz:1").unwrap(), quiz()).await.unwrap();
        manager.create(DocumentId::new("quiz:2").unwrap(), quiz()).await.unwrap();
        manager
            .create(DocumentId::new("note:1").unwrap(), ContentEntity::new(EntityKind::Note))
            .await
            .unwrap();

        assert_eq!(manager.list(Some("quiz:*")).len(), 2);
        assert_eq!(manager.list(None).len(), 3);
    }

    #[tokio::test]
    async fn test_subscribers_receive_commits() {
        let manager = DocumentManager::new();
        let id = DocumentId::new("quiz:3").unwrap();
        manager.create(id.clone(), quiz()).await.unwrap();
        let mut updates = manager.subscribe();

        let question = Value::object().with("prompt", "What do leaves absorb?");
        manager
            .submit(
                &id,
                Operation::structure_change(
                    StructureType::Questions,
                    StructureAction::Add { index: None, item: question },
                )
                .by("teacher-1"),
            )
            .await
            .unwrap();

        let event = updates.recv().await.unwrap();
        assert_eq!(event.document_id, id);
        assert_eq!(event.version, 1);
        assert_eq!(event.user_id, "teacher-1");
        assert_eq!(manager.stats().subscriber_count, 1);
        assert_eq!(manager.stats().committed_operations, 1);
    }

    #[tokio::test]
    async fn test_rejected_proposal_is_not_published() {
        let manager = DocumentManager::new();
        let id = DocumentId::new("quiz:4").unwrap();
        manager.create(id.clone(), quiz()).await.unwrap();
        let mut updates = manager.subscribe();

        manager.submit(&id, Operation::delete("title", 0, 10)).await.unwrap();
        let err = manager
            .submit(&id, Operation::insert("title", 4, "x").at_sequence(2))
            .await
            .unwrap_err();

        assert!(err.conflict().is_some());
        assert_eq!(updates.recv().await.unwrap().version, 1);
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_and_history() {
        let manager = DocumentManager::new();
        let id = DocumentId::new("quiz:5").unwrap();
        manager.create(id.clone(), quiz()).await.unwrap();
        manager.submit(&id, Operation::attribute_change("time_limit", 30i64)).await.unwrap();
        manager.submit(&id, Operation::attribute_change("passing_score", 70i64)).await.unwrap();

        let history = manager.history(&id, 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content_path, "passing_score");

        manager.delete(&id).await.unwrap();
        assert!(manager.get(&id).is_err());
        assert_eq!(manager.stats().document_count, 0);
    }
}
