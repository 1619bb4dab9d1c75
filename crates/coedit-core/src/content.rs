//! Content entities and the per-kind capabilities the applier relies on

use crate::error::{Error, Result};
use crate::operation::{StructureAction, StructureType};
use crate::value::{validate_path, Value};
use serde::{Deserialize, Serialize};

/// The kind of content entity a document holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Assignment,
    Note,
    Quiz,
}

impl EntityKind {
    /// Capabilities for this kind
    pub fn schema(self) -> &'static dyn EntitySchema {
        match self {
            EntityKind::Assignment => &AssignmentSchema,
            EntityKind::Note => &NoteSchema,
            EntityKind::Quiz => &QuizSchema,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Assignment => write!(f, "assignment"),
            EntityKind::Note => write!(f, "note"),
            EntityKind::Quiz => write!(f, "quiz"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "assignment" => Ok(EntityKind::Assignment),
            "note" => Ok(EntityKind::Note),
            "quiz" => Ok(EntityKind::Quiz),
            _ => Err(Error::Validation(format!("Unknown entity kind: {}", s))),
        }
    }
}

/// Result of a structural mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSummary {
    pub collection: String,
    /// Collection length after the change
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Value>,
}

/// What an entity kind permits: which attributes may be assigned directly
/// and which ordered collections structure changes may touch.
pub trait EntitySchema: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn allowed_attributes(&self) -> &'static [&'static str];

    /// Field holding the collection for `structure`, if this kind has one
    fn collection(&self, structure: StructureType) -> Option<&'static str>;

    fn allows_attribute(&self, attribute: &str) -> bool {
        self.allowed_attributes().contains(&attribute)
    }

    /// Check an item before it is added to a collection
    fn validate_item(&self, _structure: StructureType, _item: &Value) -> Result<()> {
        Ok(())
    }

    /// Apply `action` to the collection for `structure` inside `fields`.
    /// The collection is rebuilt off to the side and written back only on success.
    fn restructure(
        &self,
        fields: &mut Value,
        structure: StructureType,
        action: &StructureAction,
    ) -> Result<StructureSummary> {
        let collection = self.collection(structure).ok_or_else(|| {
            Error::Validation(format!("{} does not support {} changes", self.kind(), structure))
        })?;

        let mut items = match fields.get_path(collection) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(Error::Validation(format!("{} is not a list", collection)));
            }
        };

        let mut removed = None;
        match action {
            StructureAction::Add { index, item } => {
                self.validate_item(structure, item)?;
                let at = index.unwrap_or(items.len());
                if at > items.len() {
                    return Err(Error::InvalidPosition { position: at, length: items.len() });
                }
                items.insert(at, item.clone());
            }
            StructureAction::Remove { index } => {
                if *index >= items.len() {
                    return Err(Error::InvalidPosition { position: *index, length: items.len() });
                }
                removed = Some(items.remove(*index));
            }
            StructureAction::Reorder { from, to } => {
                if let Some(&position) = [from, to].into_iter().find(|i| **i >= items.len()) {
                    return Err(Error::InvalidPosition { position, length: items.len() });
                }
                let item = items.remove(*from);
                items.insert(*to, item);
            }
        }

        let length = items.len();
        fields.set_path(collection, Value::Array(items))?;

        Ok(StructureSummary {
            collection: collection.to_string(),
            length,
            removed,
        })
    }
}

pub struct AssignmentSchema;

impl EntitySchema for AssignmentSchema {
    fn kind(&self) -> EntityKind {
        EntityKind::Assignment
    }

    fn allowed_attributes(&self) -> &'static [&'static str] {
        &["title", "description", "instructions", "due_date"]
    }

    fn collection(&self, structure: StructureType) -> Option<&'static str> {
        match structure {
            StructureType::Rubric => Some("rubric"),
            _ => None,
        }
    }
}

pub struct NoteSchema;

impl EntitySchema for NoteSchema {
    fn kind(&self) -> EntityKind {
        EntityKind::Note
    }

    fn allowed_attributes(&self) -> &'static [&'static str] {
        &["title", "content"]
    }

    fn collection(&self, structure: StructureType) -> Option<&'static str> {
        match structure {
            StructureType::Sections => Some("sections"),
            _ => None,
        }
    }
}

pub struct QuizSchema;

impl EntitySchema for QuizSchema {
    fn kind(&self) -> EntityKind {
        EntityKind::Quiz
    }

    fn allowed_attributes(&self) -> &'static [&'static str] {
        &["title", "description", "time_limit", "passing_score"]
    }

    fn collection(&self, structure: StructureType) -> Option<&'static str> {
        match structure {
            StructureType::Questions => Some("questions"),
            _ => None,
        }
    }

    /// Questions are objects carrying a text prompt
    fn validate_item(&self, _structure: StructureType, item: &Value) -> Result<()> {
        match item.get_path("prompt") {
            Some(Value::String(prompt)) if !prompt.is_empty() => Ok(()),
            _ => Err(Error::Validation("quiz questions need a non-empty prompt".into())),
        }
    }
}

/// A content entity (assignment, note, quiz, ...) owned by a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    pub kind: EntityKind,
    #[serde(default = "Value::object")]
    pub fields: Value,
}

impl ContentEntity {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: Value::object(),
        }
    }

    /// Builder-style field assignment
    pub fn with_field(mut self, path: &str, value: impl Into<Value>) -> Result<Self> {
        validate_path(path)?;
        self.fields.set_path(path, value.into())?;
        Ok(self)
    }

    pub fn schema(&self) -> &'static dyn EntitySchema {
        self.kind.schema()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get_path(path)
    }

    /// The string held at `path`
    pub fn text(&self, path: &str) -> Result<&str> {
        match self.fields.get_path(path) {
            Some(Value::String(s)) => Ok(s),
            Some(Value::Null) | None => Err(Error::PathNotFound(path.to_string())),
            Some(_) => Err(Error::Validation(format!("{} does not hold text", path))),
        }
    }

    /// Overwrite the string at an existing `path`
    pub(crate) fn write_text(&mut self, path: &str, text: String) -> Result<()> {
        match self.fields.get_path_mut(path) {
            Some(slot) if matches!(slot, Value::String(_)) => {
                *slot = Value::String(text);
                Ok(())
            }
            _ => Err(Error::PathNotFound(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(prompt: &str) -> Value {
        let mut q = Value::object();
        q.set_path("prompt", prompt.into()).unwrap();
        q
    }

    #[test]
    fn test_allow_lists_per_kind() {
        assert!(EntityKind::Assignment.schema().allows_attribute("due_date"));
        assert!(!EntityKind::Note.schema().allows_attribute("due_date"));
        assert!(EntityKind::Note.schema().allows_attribute("content"));
        assert!(EntityKind::Quiz.schema().allows_attribute("time_limit"));
    }

    #[test]
    fn test_text_lookup() {
        let entity = ContentEntity::new(EntityKind::Note)
            .with_field("title", "Cells")
            .unwrap()
            .with_field("score", 3i64)
            .unwrap();

        assert_eq!(entity.text("title").unwrap(), "Cells");
        assert!(matches!(entity.text("content"), Err(Error::PathNotFound(_))));
        assert!(matches!(entity.text("score"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_with_field_rejects_bad_path() {
        let entity = ContentEntity::new(EntityKind::Note);
        assert!(matches!(entity.clone().with_field("", "x"), Err(Error::Validation(_))));
        assert!(matches!(entity.with_field("bad path", "x"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_quiz_question_add_remove_reorder() {
        let schema = EntityKind::Quiz.schema();
        let mut fields = Value::object();

        for prompt in ["a", "b", "c"] {
            let action = StructureAction::Add { index: None, item: question(prompt) };
            schema.restructure(&mut fields, StructureType::Questions, &action).unwrap();
        }

        let summary = schema
            .restructure(&mut fields, StructureType::Questions, &StructureAction::Reorder { from: 2, to: 0 })
            .unwrap();
        assert_eq!(summary.length, 3);
        assert_eq!(fields.get_path("questions[0].prompt"), Some(&Value::from("c")));

        let summary = schema
            .restructure(&mut fields, StructureType::Questions, &StructureAction::Remove { index: 1 })
            .unwrap();
        assert_eq!(summary.removed, Some(question("a")));
        assert!(matches!(fields.get_path("questions"), Some(Value::Array(items)) if items.len() == 2));
    }

    #[test]
    fn test_restructure_rejects_unsupported_and_out_of_range() {
        let mut fields = Value::object();

        let add = StructureAction::Add { index: None, item: "intro".into() };
        assert!(EntityKind::Note.schema().restructure(&mut fields, StructureType::Questions, &add).is_err());

        let bad_question = StructureAction::Add { index: None, item: "no prompt".into() };
        assert!(EntityKind::Quiz
            .schema()
            .restructure(&mut fields, StructureType::Questions, &bad_question)
            .is_err());

        let remove = StructureAction::Remove { index: 0 };
        assert!(matches!(
            EntityKind::Note.schema().restructure(&mut fields, StructureType::Sections, &remove),
            Err(Error::InvalidPosition { position: 0, length: 0 })
        ));
        assert_eq!(fields, Value::object());
    }
}
