//! Edit operations: the unit of change proposed against a content field

use crate::error::{Error, Result};
use crate::value::{char_len, validate_path, Value};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

/// Operation identifier (UUID v4 string)
pub type OperationId = String;

/// The kind of an operation, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Delete,
    Replace,
    Format,
    Move,
    AttributeChange,
    StructureChange,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Delete => "delete",
            OperationType::Replace => "replace",
            OperationType::Format => "format",
            OperationType::Move => "move",
            OperationType::AttributeChange => "attribute_change",
            OperationType::StructureChange => "structure_change",
        }
    }

    /// Types that edit characters of a string field
    pub fn is_text_edit(&self) -> bool {
        matches!(
            self,
            OperationType::Insert
                | OperationType::Delete
                | OperationType::Replace
                | OperationType::Move
                | OperationType::Format
        )
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Styling sub-kinds accepted by `format` operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    Bold,
    Italic,
    Underline,
}

impl std::fmt::Display for FormatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatType::Bold => write!(f, "bold"),
            FormatType::Italic => write!(f, "italic"),
            FormatType::Underline => write!(f, "underline"),
        }
    }
}

/// Ordered child collections a structure change can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    Questions,
    Rubric,
    Sections,
}

impl std::fmt::Display for StructureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureType::Questions => write!(f, "questions"),
            StructureType::Rubric => write!(f, "rubric"),
            StructureType::Sections => write!(f, "sections"),
        }
    }
}

/// Mutation of an ordered child collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StructureAction {
    /// Insert `item` at `index`, or append when no index is given
    Add {
        #[serde(default)]
        index: Option<usize>,
        item: Value,
    },
    Remove {
        index: usize,
    },
    Reorder {
        from: usize,
        to: usize,
    },
}

impl StructureAction {
    /// Collection indices touched by this action, as a half-open range.
    /// Appends sit past every index and touch nothing.
    pub(crate) fn span(&self) -> (usize, usize) {
        match self {
            StructureAction::Add { index: Some(i), .. } => (*i, i + 1),
            StructureAction::Add { index: None, .. } => (usize::MAX, usize::MAX),
            StructureAction::Remove { index } => (*index, index + 1),
            StructureAction::Reorder { from, to } => (*from.min(to), from.max(to) + 1),
        }
    }
}

/// Type-specific payload of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum OperationData {
    Insert {
        text: String,
    },
    Delete,
    Replace {
        new_text: String,
    },
    Format {
        format_type: FormatType,
    },
    Move {
        target_position: usize,
    },
    AttributeChange {
        attribute: String,
        value: Value,
    },
    StructureChange {
        structure_type: StructureType,
        action: StructureAction,
    },
}

impl OperationData {
    pub fn operation_type(&self) -> OperationType {
        match self {
            OperationData::Insert { .. } => OperationType::Insert,
            OperationData::Delete => OperationType::Delete,
            OperationData::Replace { .. } => OperationType::Replace,
            OperationData::Format { .. } => OperationType::Format,
            OperationData::Move { .. } => OperationType::Move,
            OperationData::AttributeChange { .. } => OperationType::AttributeChange,
            OperationData::StructureChange { .. } => OperationType::StructureChange,
        }
    }
}

/// A single proposed (or committed) edit to one content field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default = "new_operation_id")]
    pub id: OperationId,
    pub content_path: String,
    #[serde(default)]
    pub start_position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_position: Option<usize>,
    pub operation_data: OperationData,
    #[serde(default)]
    pub user_id: String,
    /// Version the operation was computed against, or its commit index once committed
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default = "now_millis")]
    pub timestamp: u64,
}

impl Operation {
    fn new(
        content_path: impl Into<String>,
        start_position: usize,
        end_position: Option<usize>,
        operation_data: OperationData,
    ) -> Self {
        Self {
            id: new_operation_id(),
            content_path: content_path.into(),
            start_position,
            end_position,
            operation_data,
            user_id: String::new(),
            sequence_number: 0,
            timestamp: now_millis(),
        }
    }

    pub fn insert(content_path: impl Into<String>, position: usize, text: impl Into<String>) -> Self {
        Self::new(content_path, position, None, OperationData::Insert { text: text.into() })
    }

    pub fn delete(content_path: impl Into<String>, start: usize, end: usize) -> Self {
        Self::new(content_path, start, Some(end), OperationData::Delete)
    }

    pub fn replace(
        content_path: impl Into<String>,
        start: usize,
        end: usize,
        new_text: impl Into<String>,
    ) -> Self {
        Self::new(
            content_path,
            start,
            Some(end),
            OperationData::Replace { new_text: new_text.into() },
        )
    }

    pub fn format(content_path: impl Into<String>, start: usize, end: usize, format_type: FormatType) -> Self {
        Self::new(content_path, start, Some(end), OperationData::Format { format_type })
    }

    pub fn move_range(content_path: impl Into<String>, start: usize, end: usize, target: usize) -> Self {
        Self::new(
            content_path,
            start,
            Some(end),
            OperationData::Move { target_position: target },
        )
    }

    /// Assign `value` to the top-level `attribute` of the entity
    pub fn attribute_change(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        Self::new(
            attribute.clone(),
            0,
            None,
            OperationData::AttributeChange { attribute, value: value.into() },
        )
    }

    pub fn structure_change(structure_type: StructureType, action: StructureAction) -> Self {
        let (start, end) = action.span();
        Self::new(
            structure_type.to_string(),
            start,
            Some(end),
            OperationData::StructureChange { structure_type, action },
        )
    }

    /// Set the proposing user
    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Set the sequence number
    pub fn at_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_data.operation_type()
    }

    /// End of the range; zero-width operations end where they start
    pub fn end(&self) -> usize {
        self.end_position.unwrap_or(self.start_position)
    }

    pub fn range(&self) -> Range<usize> {
        self.start_position..self.end()
    }

    /// Text inserted by an `insert`, or the replacement text of a `replace`
    pub fn text(&self) -> Option<&str> {
        match &self.operation_data {
            OperationData::Insert { text } => Some(text),
            OperationData::Replace { new_text } => Some(new_text),
            _ => None,
        }
    }

    /// Change in content length this operation causes, assuming its range is in bounds
    pub fn length_delta(&self) -> i64 {
        let removed = self.end().saturating_sub(self.start_position) as i64;
        match &self.operation_data {
            OperationData::Insert { text } => char_len(text) as i64,
            OperationData::Delete => -removed,
            OperationData::Replace { new_text } => char_len(new_text) as i64 - removed,
            _ => 0,
        }
    }

    /// A copy of this operation at a new range
    pub fn with_range(&self, start: usize, end: Option<usize>) -> Self {
        Self {
            start_position: start,
            end_position: end,
            ..self.clone()
        }
    }

    /// Check the operation is well formed before any transform or apply
    pub fn validate(&self) -> Result<()> {
        validate_path(&self.content_path)?;

        if let Some(end) = self.end_position {
            if end < self.start_position {
                return Err(Error::Validation(format!(
                    "end_position {} precedes start_position {}",
                    end, self.start_position
                )));
            }
        }

        match &self.operation_data {
            OperationData::Insert { text } if text.is_empty() => {
                Err(Error::Validation("insert requires non-empty text".into()))
            }
            OperationData::Delete
            | OperationData::Replace { .. }
            | OperationData::Move { .. }
            | OperationData::Format { .. }
                if self.end_position.is_none() =>
            {
                Err(Error::Validation(format!(
                    "{} requires end_position",
                    self.operation_type()
                )))
            }
            OperationData::AttributeChange { attribute, .. } if attribute.trim().is_empty() => {
                Err(Error::Validation("attribute_change requires an attribute name".into()))
            }
            _ => Ok(()),
        }
    }
}

pub(crate) fn new_operation_id() -> OperationId {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
