//! Applying conflict-free operations to a content entity
//!
//! Every apply computes the complete new field value before writing it, so a
//! failing operation never leaves the entity partially mutated.

use crate::content::{ContentEntity, StructureSummary};
use crate::error::{Error, Result};
use crate::operation::{FormatType, Operation, OperationData, OperationType, StructureType};
use crate::value::{char_len, splice, Value};
use serde::{Deserialize, Serialize};

/// What an applied operation changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeDetail {
    /// Characters spliced into a string field; `start..end` is the range the
    /// operation actually covered after clamping
    Text {
        start: usize,
        end: usize,
        inserted: String,
        removed: String,
    },
    Moved {
        start: usize,
        end: usize,
        /// Offset the moved text now begins at
        target: usize,
        text: String,
    },
    Formatted {
        start: usize,
        end: usize,
        format_type: FormatType,
    },
    Attribute {
        attribute: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Value>,
        value: Value,
    },
    Structure {
        structure_type: StructureType,
        summary: StructureSummary,
    },
}

/// Outcome of a successful apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applied {
    pub content_path: String,
    pub operation_type: OperationType,
    /// Change in the field's character length
    pub length_delta: i64,
    pub detail: ChangeDetail,
}

impl Applied {
    /// Text removed from the field, for undo and audit
    pub fn removed_text(&self) -> Option<&str> {
        match &self.detail {
            ChangeDetail::Text { removed, .. } if !removed.is_empty() => Some(removed),
            _ => None,
        }
    }

    /// An operation that undoes this change, when one exists.
    /// Formatting and structural changes have no inverse.
    pub fn inverse(&self) -> Option<Operation> {
        let path = self.content_path.as_str();
        match &self.detail {
            ChangeDetail::Text { start, inserted, removed, .. } => {
                let inserted_end = start + char_len(inserted);
                match (inserted.is_empty(), removed.is_empty()) {
                    (true, true) => None,
                    (false, true) => Some(Operation::delete(path, *start, inserted_end)),
                    (true, false) => Some(Operation::insert(path, *start, removed.clone())),
                    (false, false) => Some(Operation::replace(path, *start, inserted_end, removed.clone())),
                }
            }
            ChangeDetail::Moved { start, target, text, .. } => {
                let len = char_len(text);
                let back = if start <= target { *start } else { start + len };
                Some(Operation::move_range(path, *target, target + len, back))
            }
            ChangeDetail::Attribute { attribute, previous, .. } => previous
                .clone()
                .map(|value| Operation::attribute_change(attribute.clone(), value)),
            ChangeDetail::Formatted { .. } | ChangeDetail::Structure { .. } => None,
        }
    }
}

/// Check that `op` can address `entity` at all: the path resolves, the
/// attribute is allowed, the collection exists for this kind.
pub fn preflight(entity: &ContentEntity, op: &Operation) -> Result<()> {
    match &op.operation_data {
        OperationData::AttributeChange { attribute, .. } => check_attribute(entity, attribute),
        OperationData::StructureChange { structure_type, .. } => entity
            .schema()
            .collection(*structure_type)
            .map(|_| ())
            .ok_or_else(|| {
                Error::Validation(format!("{} does not support {} changes", entity.kind, structure_type))
            }),
        _ => entity.text(&op.content_path).map(|_| ()),
    }
}

/// Apply one conflict-free operation to `entity`
pub fn apply(entity: &mut ContentEntity, op: &Operation) -> Result<Applied> {
    op.validate()?;

    match &op.operation_data {
        OperationData::Insert { text } => apply_insert(entity, op, text),
        OperationData::Delete => apply_delete(entity, op),
        OperationData::Replace { new_text } => apply_replace(entity, op, new_text),
        OperationData::Move { target_position } => apply_move(entity, op, *target_position),
        OperationData::Format { format_type } => apply_format(entity, op, *format_type),
        OperationData::AttributeChange { attribute, value } => apply_attribute(entity, op, attribute, value),
        OperationData::StructureChange { structure_type, action } => {
            let summary = entity.schema().restructure(&mut entity.fields, *structure_type, action)?;
            Ok(Applied {
                content_path: op.content_path.clone(),
                operation_type: OperationType::StructureChange,
                length_delta: 0,
                detail: ChangeDetail::Structure {
                    structure_type: *structure_type,
                    summary,
                },
            })
        }
    }
}

/// Apply a set of operations in order, all or nothing
pub fn apply_all(entity: &mut ContentEntity, ops: &[Operation]) -> Result<Vec<Applied>> {
    let mut staged = entity.clone();
    let applied = ops
        .iter()
        .map(|op| apply(&mut staged, op))
        .collect::<Result<Vec<_>>>()?;
    *entity = staged;
    Ok(applied)
}

fn apply_insert(entity: &mut ContentEntity, op: &Operation, text: &str) -> Result<Applied> {
    let current = entity.text(&op.content_path)?;
    let position = op.start_position.min(char_len(current));
    let (updated, _) = splice(current, position, position, text);
    entity.write_text(&op.content_path, updated)?;

    Ok(text_change(op, position, position, text.to_string(), String::new()))
}

fn apply_delete(entity: &mut ContentEntity, op: &Operation) -> Result<Applied> {
    let current = entity.text(&op.content_path)?;
    let length = char_len(current);
    if op.start_position >= length {
        return Err(Error::InvalidPosition { position: op.start_position, length });
    }
    let end = op.end().min(length);
    let (updated, removed) = splice(current, op.start_position, end, "");
    entity.write_text(&op.content_path, updated)?;

    Ok(text_change(op, op.start_position, end, String::new(), removed))
}

fn apply_replace(entity: &mut ContentEntity, op: &Operation, new_text: &str) -> Result<Applied> {
    let current = entity.text(&op.content_path)?;
    let length = char_len(current);
    // past the end degrades to an append
    let (start, end) = if op.start_position >= length {
        (length, length)
    } else {
        (op.start_position, op.end().min(length))
    };
    let (updated, removed) = splice(current, start, end, new_text);
    entity.write_text(&op.content_path, updated)?;

    Ok(text_change(op, start, end, new_text.to_string(), removed))
}

fn apply_move(entity: &mut ContentEntity, op: &Operation, target: usize) -> Result<Applied> {
    let current = entity.text(&op.content_path)?;
    let length = char_len(current);
    if op.start_position >= length {
        return Err(Error::InvalidPosition { position: op.start_position, length });
    }
    let (start, end) = (op.start_position, op.end().min(length));

    let (remaining, moved) = splice(current, start, end, "");
    let moved_len = end - start;
    // the target is given in offsets from before the removal
    let adjusted = if target >= end {
        target - moved_len
    } else if target > start {
        start
    } else {
        target
    };
    let adjusted = adjusted.min(length - moved_len);
    let (updated, _) = splice(&remaining, adjusted, adjusted, &moved);
    entity.write_text(&op.content_path, updated)?;

    Ok(Applied {
        content_path: op.content_path.clone(),
        operation_type: OperationType::Move,
        length_delta: 0,
        detail: ChangeDetail::Moved {
            start,
            end,
            target: adjusted,
            text: moved,
        },
    })
}

fn apply_format(entity: &ContentEntity, op: &Operation, format_type: FormatType) -> Result<Applied> {
    let length = char_len(entity.text(&op.content_path)?);
    if op.start_position > length {
        return Err(Error::InvalidPosition { position: op.start_position, length });
    }

    Ok(Applied {
        content_path: op.content_path.clone(),
        operation_type: OperationType::Format,
        length_delta: 0,
        detail: ChangeDetail::Formatted {
            start: op.start_position,
            end: op.end().min(length),
            format_type,
        },
    })
}

fn apply_attribute(entity: &mut ContentEntity, op: &Operation, attribute: &str, value: &Value) -> Result<Applied> {
    check_attribute(entity, attribute)?;

    let previous = entity.get(attribute).filter(|v| !v.is_null()).cloned();
    entity.fields.set_path(attribute, value.clone())?;

    Ok(Applied {
        content_path: op.content_path.clone(),
        operation_type: OperationType::AttributeChange,
        length_delta: 0,
        detail: ChangeDetail::Attribute {
            attribute: attribute.to_string(),
            previous,
            value: value.clone(),
        },
    })
}

fn check_attribute(entity: &ContentEntity, attribute: &str) -> Result<()> {
    if entity.schema().allows_attribute(attribute) {
        Ok(())
    } else {
        Err(Error::AttributeNotAllowed {
            kind: entity.kind,
            attribute: attribute.to_string(),
        })
    }
}

fn text_change(op: &Operation, start: usize, end: usize, inserted: String, removed: String) -> Applied {
    Applied {
        content_path: op.content_path.clone(),
        operation_type: op.operation_type(),
        length_delta: char_len(&inserted) as i64 - char_len(&removed) as i64,
        detail: ChangeDetail::Text {
            start,
            end,
            inserted,
            removed,
        },
    }
}
