//! Structured conflicts between a pending operation and a committed one

use crate::operation::{Operation, OperationId, OperationType};
use serde::{Deserialize, Serialize};

/// Why two operations could not be reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    InsertWithinDeletedRange,
    InsertWithinReplacedRange,
    DeleteOverlapsReplace,
    ReplaceOverlapsDelete,
    OverlappingReplaces,
    /// Generic overlap on the same content path
    OverlappingRanges,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::InsertWithinDeletedRange => "insert_within_deleted_range",
            ConflictKind::InsertWithinReplacedRange => "insert_within_replaced_range",
            ConflictKind::DeleteOverlapsReplace => "delete_overlaps_replace",
            ConflictKind::ReplaceOverlapsDelete => "replace_overlaps_delete",
            ConflictKind::OverlappingReplaces => "overlapping_replaces",
            ConflictKind::OverlappingRanges => "overlapping_ranges",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one side of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub user_id: String,
    pub sequence_number: u64,
}

impl From<&Operation> for OperationSummary {
    fn from(op: &Operation) -> Self {
        Self {
            id: op.id.clone(),
            operation_type: op.operation_type(),
            user_id: op.user_id.clone(),
            sequence_number: op.sequence_number,
        }
    }
}

/// Half-open character range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    pub start: usize,
    pub end: usize,
}

impl From<&Operation> for PositionRange {
    fn from(op: &Operation) -> Self {
        Self {
            start: op.start_position,
            end: op.end(),
        }
    }
}

/// A pair of operations whose effects cannot be deterministically reconciled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub content_path: String,
    pub base: OperationSummary,
    pub concurrent: OperationSummary,
    pub base_range: PositionRange,
    pub concurrent_range: PositionRange,
}

impl ConflictInfo {
    pub fn new(kind: ConflictKind, base: &Operation, concurrent: &Operation) -> Self {
        Self {
            kind,
            content_path: base.content_path.clone(),
            base: base.into(),
            concurrent: concurrent.into(),
            base_range: base.into(),
            concurrent_range: concurrent.into(),
        }
    }
}

impl std::fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} on {}: {} [{}, {}) by {:?} against {} [{}, {}) by {:?} (sequence {})",
            self.kind,
            self.content_path,
            self.base.operation_type,
            self.base_range.start,
            self.base_range.end,
            self.base.user_id,
            self.concurrent.operation_type,
            self.concurrent_range.start,
            self.concurrent_range.end,
            self.concurrent.user_id,
            self.concurrent.sequence_number,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_serializes_typed_kind() {
        let base = Operation::insert("title", 10, "x").by("alice").at_sequence(4);
        let concurrent = Operation::delete("title", 5, 15).by("bob").at_sequence(3);
        let info = ConflictInfo::new(ConflictKind::InsertWithinDeletedRange, &base, &concurrent);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "insert_within_deleted_range");
        assert_eq!(json["base"]["type"], "insert");
        assert_eq!(json["concurrent"]["user_id"], "bob");
        assert_eq!(json["concurrent_range"]["end"], 15);
    }
}
