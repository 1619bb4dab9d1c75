//! Pairwise operational transformation and history replay
//!
//! `transform` rebases a pending operation over one operation that committed
//! first. All positions in the result are relative to the content *after*
//! the committed operation. `transform_against_history` folds that step over
//! a document's committed log.

use crate::config::RebaseWindow;
use crate::conflict::{ConflictInfo, ConflictKind};
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationData, OperationId};
use crate::value::{char_len, splice};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Audit record of one transform step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformLogEntry {
    /// What the step did, e.g. `insert_insert_position_shifted`
    pub kind: String,
    /// Signed position shift, or change in range length for trimming steps
    pub adjustment: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_sequence: Option<u64>,
}

/// A conflict-free transform result.
///
/// `operations` is empty when the pending operation became a no-op, and holds
/// two deletes when an insert split a pending delete. Every entry is expressed
/// against the same content state, ordered from the highest start offset down,
/// so applying them in order is always valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rebased {
    pub operations: Vec<Operation>,
    pub log: Vec<TransformLogEntry>,
}

impl Rebased {
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }

    /// The transformed operation, when the result is exactly one
    pub fn single(&self) -> Option<&Operation> {
        match self.operations.as_slice() {
            [op] => Some(op),
            _ => None,
        }
    }
}

/// Result of rebasing an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformOutcome {
    Rebased(Rebased),
    Conflict(ConflictInfo),
}

impl TransformOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransformOutcome::Conflict(_))
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self {
            TransformOutcome::Conflict(info) => Some(info),
            TransformOutcome::Rebased(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Rebased> {
        match self {
            TransformOutcome::Rebased(rebased) => Ok(rebased),
            TransformOutcome::Conflict(info) => Err(Error::Conflict(Box::new(info))),
        }
    }
}

type Step = std::result::Result<(Vec<Operation>, &'static str, i64), ConflictKind>;

/// Rebase `base` over `concurrent`, which has already been committed.
///
/// With no concurrent operation the result is `base` unchanged.
pub fn transform(base: &Operation, concurrent: Option<&Operation>) -> TransformOutcome {
    let Some(concurrent) = concurrent else {
        return TransformOutcome::Rebased(Rebased {
            operations: vec![base.clone()],
            log: vec![TransformLogEntry {
                kind: "identity".into(),
                adjustment: 0,
                concurrent_id: None,
                concurrent_sequence: None,
            }],
        });
    };

    let step = if base.content_path != concurrent.content_path {
        unchanged(base, "different_path")
    } else {
        rebase(base, concurrent)
    };

    match step {
        Ok((operations, kind, adjustment)) => {
            trace!(
                base = %base.id,
                concurrent = %concurrent.id,
                kind,
                adjustment,
                "Transformed operation"
            );
            TransformOutcome::Rebased(Rebased {
                operations,
                log: vec![TransformLogEntry {
                    kind: kind.to_string(),
                    adjustment,
                    concurrent_id: Some(concurrent.id.clone()),
                    concurrent_sequence: Some(concurrent.sequence_number),
                }],
            })
        }
        Err(kind) => TransformOutcome::Conflict(ConflictInfo::new(kind, base, concurrent)),
    }
}

/// Fold `transform` over the committed `history`, in ascending sequence order,
/// using the default rebase window.
pub fn transform_operation_against_history(base: &Operation, history: &[Operation]) -> TransformOutcome {
    transform_against_history(base, history, RebaseWindow::default())
}

/// Fold `transform` over the entries of `history` that `window` selects,
/// in ascending sequence order. Stops at the first conflict.
pub fn transform_against_history(
    base: &Operation,
    history: &[Operation],
    window: RebaseWindow,
) -> TransformOutcome {
    let mut committed: Vec<&Operation> = history
        .iter()
        .filter(|op| window.includes(base.sequence_number, op.sequence_number))
        .collect();
    committed.sort_by_key(|op| op.sequence_number);

    let mut pending = vec![base.clone()];
    let mut log = Vec::new();

    for concurrent in committed {
        let mut next = Vec::with_capacity(pending.len());
        for op in &pending {
            match transform(op, Some(concurrent)) {
                TransformOutcome::Rebased(step) => {
                    next.extend(step.operations);
                    log.extend(step.log);
                }
                TransformOutcome::Conflict(info) => {
                    debug!(
                        base = %base.id,
                        concurrent = %concurrent.id,
                        sequence = concurrent.sequence_number,
                        kind = %info.kind,
                        "Conflict while replaying history"
                    );
                    return TransformOutcome::Conflict(info);
                }
            }
        }
        pending = next;
        if pending.is_empty() {
            break;
        }
    }

    pending.sort_by(|a, b| b.start_position.cmp(&a.start_position));
    TransformOutcome::Rebased(Rebased { operations: pending, log })
}

fn rebase(base: &Operation, concurrent: &Operation) -> Step {
    use OperationData as D;

    match (&base.operation_data, &concurrent.operation_data) {
        (D::Insert { .. }, D::Insert { text }) => insert_insert(base, concurrent, char_len(text)),
        (D::Insert { .. }, D::Delete) => insert_delete(base, concurrent),
        (D::Insert { .. }, D::Replace { new_text }) => insert_replace(base, concurrent, new_text),
        (D::Delete, D::Insert { text }) => delete_insert(base, concurrent, char_len(text)),
        (D::Delete, D::Delete) => delete_delete(base, concurrent),
        (D::Delete, D::Replace { new_text }) => delete_replace(base, concurrent, new_text),
        (D::Replace { new_text }, D::Insert { text }) => replace_insert(base, concurrent, new_text, text),
        (D::Replace { .. }, D::Delete) => replace_delete(base, concurrent),
        (D::Replace { .. }, D::Replace { new_text }) => replace_replace(base, concurrent, new_text),
        _ => generic(base, concurrent),
    }
}

fn insert_insert(base: &Operation, c: &Operation, inserted: usize) -> Step {
    if base.start_position <= c.start_position {
        unchanged(base, "insert_insert_no_change")
    } else {
        shifted(base, "insert_insert_position_shifted", inserted as i64)
    }
}

fn insert_delete(base: &Operation, c: &Operation) -> Step {
    let (cs, ce) = (c.start_position, c.end());
    if base.start_position <= cs {
        unchanged(base, "insert_delete_no_change")
    } else if base.start_position >= ce {
        shifted(base, "insert_delete_position_shifted", -((ce - cs) as i64))
    } else {
        Err(ConflictKind::InsertWithinDeletedRange)
    }
}

fn insert_replace(base: &Operation, c: &Operation, new_text: &str) -> Step {
    if base.start_position <= c.start_position {
        unchanged(base, "insert_replace_no_change")
    } else if base.start_position >= c.end() {
        shifted(base, "insert_replace_position_shifted", replacement_delta(c, new_text))
    } else {
        Err(ConflictKind::InsertWithinReplacedRange)
    }
}

fn delete_insert(base: &Operation, c: &Operation, inserted: usize) -> Step {
    let (bs, be) = (base.start_position, base.end());
    let at = c.start_position;

    if at <= bs {
        shifted(base, "delete_insert_range_shifted", inserted as i64)
    } else if at >= be {
        unchanged(base, "delete_insert_no_change")
    } else {
        // the inserted text survives between the two halves
        let upper = base.with_range(at + inserted, Some(be + inserted));
        let lower = base.with_range(bs, Some(at));
        Ok((vec![upper, lower], "delete_insert_split", inserted as i64))
    }
}

fn delete_delete(base: &Operation, c: &Operation) -> Step {
    let (bs, be) = (base.start_position, base.end());
    let (cs, ce) = (c.start_position, c.end());
    let removed = (ce - cs) as i64;

    if be <= cs {
        return unchanged(base, "delete_delete_no_change");
    }
    if bs >= ce {
        return shifted(base, "delete_delete_position_shifted", -removed);
    }

    if cs <= bs && ce >= be {
        return Ok((vec![], "delete_delete_contained_noop", -((be - bs) as i64)));
    }
    if bs <= cs && be >= ce {
        let shrunk = base.with_range(bs, Some(be - (ce - cs)));
        return Ok((vec![shrunk], "delete_delete_range_shrunk", -removed));
    }

    if cs > bs {
        // concurrent took our tail
        let kept = base.with_range(bs, Some(cs));
        Ok((vec![kept], "delete_delete_tail_trimmed", -((be - cs) as i64)))
    } else {
        // concurrent took our head; what is left now starts where it started
        let kept = base.with_range(cs, Some(cs + (be - ce)));
        Ok((vec![kept], "delete_delete_head_trimmed", -((ce - bs) as i64)))
    }
}

fn delete_replace(base: &Operation, c: &Operation, new_text: &str) -> Step {
    if base.end() <= c.start_position {
        unchanged(base, "delete_replace_no_change")
    } else if base.start_position >= c.end() {
        shifted(base, "delete_replace_position_shifted", replacement_delta(c, new_text))
    } else {
        Err(ConflictKind::DeleteOverlapsReplace)
    }
}

fn replace_insert(base: &Operation, c: &Operation, new_text: &str, inserted: &str) -> Step {
    let (bs, be) = (base.start_position, base.end());
    let at = c.start_position;
    let len = char_len(inserted);

    if at <= bs {
        shifted(base, "replace_insert_range_shifted", len as i64)
    } else if at >= be {
        unchanged(base, "replace_insert_no_change")
    } else {
        let offset = (at - bs).min(char_len(new_text));
        let (merged, _) = splice(new_text, offset, offset, inserted);
        let mut op = base.with_range(bs, Some(be + len));
        op.operation_data = OperationData::Replace { new_text: merged };
        Ok((vec![op], "replace_insert_incorporated", len as i64))
    }
}

fn replace_delete(base: &Operation, c: &Operation) -> Step {
    let (cs, ce) = (c.start_position, c.end());
    if base.end() <= cs {
        unchanged(base, "replace_delete_no_change")
    } else if base.start_position >= ce {
        shifted(base, "replace_delete_position_shifted", -((ce - cs) as i64))
    } else {
        Err(ConflictKind::ReplaceOverlapsDelete)
    }
}

fn replace_replace(base: &Operation, c: &Operation, new_text: &str) -> Step {
    if base.end() <= c.start_position {
        unchanged(base, "replace_replace_no_change")
    } else if base.start_position >= c.end() {
        shifted(base, "replace_replace_position_shifted", replacement_delta(c, new_text))
    } else {
        Err(ConflictKind::OverlappingReplaces)
    }
}

/// format, move, attribute_change and structure_change, in either position
fn generic(base: &Operation, c: &Operation) -> Step {
    let (bs, be) = span(base);
    let (cs, ce) = span(c);
    if bs < ce && cs < be {
        Err(ConflictKind::OverlappingRanges)
    } else {
        unchanged(base, "generic_no_change")
    }
}

/// Range used for overlap tests; zero-width operations occupy one position.
/// Structure changes are ranged by the collection indices their action touches.
fn span(op: &Operation) -> (usize, usize) {
    if let OperationData::StructureChange { action, .. } = &op.operation_data {
        return action.span();
    }
    let (start, end) = (op.start_position, op.end());
    if end > start {
        (start, end)
    } else {
        (start, start.saturating_add(1))
    }
}

fn replacement_delta(c: &Operation, new_text: &str) -> i64 {
    char_len(new_text) as i64 - c.end().saturating_sub(c.start_position) as i64
}

fn unchanged(base: &Operation, kind: &'static str) -> Step {
    Ok((vec![base.clone()], kind, 0))
}

fn shifted(base: &Operation, kind: &'static str, delta: i64) -> Step {
    let start = offset(base.start_position, delta);
    let end = base.end_position.map(|e| offset(e, delta));
    Ok((vec![base.with_range(start, end)], kind, delta))
}

fn offset(pos: usize, delta: i64) -> usize {
    if delta >= 0 {
        pos.saturating_add(delta as usize)
    } else {
        pos.saturating_sub(delta.unsigned_abs() as usize)
    }
}
