//! coedit Core - Operational Transformation Engine
//!
//! This crate provides the core functionality for coedit:
//! - Edit operations on educational content (assignments, notes, quizzes)
//! - Pairwise transformation and history rebasing with conflict detection
//! - Application of operations to content entities
//! - Per-document sessions that serialize commits, and a manager with subscriptions

pub mod apply;
pub mod config;
pub mod conflict;
pub mod content;
pub mod document;
pub mod error;
pub mod manager;
pub mod operation;
pub mod session;
pub mod store;
pub mod transform;
pub mod value;

pub use apply::{apply, apply_all, preflight, Applied, ChangeDetail};
pub use config::{EngineConfig, RebaseWindow};
pub use conflict::{ConflictInfo, ConflictKind, OperationSummary, PositionRange};
pub use content::{ContentEntity, EntityKind, EntitySchema, StructureSummary};
pub use document::{DocumentId, DocumentMeta};
pub use error::{Error, Result};
pub use manager::{CommitEvent, DocumentManager, ManagerStats};
pub use operation::{
    FormatType, Operation, OperationData, OperationId, OperationType, StructureAction, StructureType,
};
pub use session::{Commit, Session};
pub use store::{HistoryStore, StoreStats, StoredDocument};
pub use transform::{
    transform, transform_against_history, transform_operation_against_history, Rebased,
    TransformLogEntry, TransformOutcome,
};
pub use value::{char_len, Value};
