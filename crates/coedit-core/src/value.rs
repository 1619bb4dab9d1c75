//! Field values held by content entities and path addressing into them

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value stored in a content entity field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// An empty object
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Builder-style key assignment; turns a non-object into an object first
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !matches!(self, Value::Object(_)) {
            self = Value::object();
        }
        if let Value::Object(map) = &mut self {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get a value at a path (e.g., "questions[0].prompt")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        PathSegment::parse(path).try_fold(self, |current, segment| match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Index(idx), Value::Array(items)) => items.get(idx),
            _ => None,
        })
    }

    /// Get a mutable reference to an existing value at a path
    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        PathSegment::parse(path).try_fold(self, |current, segment| match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
            (PathSegment::Index(idx), Value::Array(items)) => items.get_mut(idx),
            _ => None,
        })
    }

    /// Set a value at a path. Missing parents are created, and a parent of the
    /// wrong shape is replaced by an empty object or list.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<PathSegment> = PathSegment::parse(path).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(Error::Validation(format!("empty content path: {:?}", path)));
        };

        let slot = parents
            .iter()
            .fold(self, |current, segment| current.child_or_insert(segment));
        *slot.child_or_insert(last) = value;
        Ok(())
    }

    fn child_or_insert(&mut self, segment: &PathSegment) -> &mut Value {
        match segment {
            PathSegment::Key(key) => {
                if !matches!(self, Value::Object(_)) {
                    *self = Value::object();
                }
                match self {
                    Value::Object(map) => map.entry(key.to_string()).or_default(),
                    other => other,
                }
            }
            PathSegment::Index(idx) => {
                if !matches!(self, Value::Array(_)) {
                    *self = Value::Array(Vec::new());
                }
                match self {
                    Value::Array(items) => {
                        if items.len() <= *idx {
                            items.resize(idx + 1, Value::Null);
                        }
                        &mut items[*idx]
                    }
                    other => other,
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::Integer(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::Float(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Number type supporting both integers and floats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

/// Path segment for navigating entity fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

impl<'a> PathSegment<'a> {
    /// Parse a path string into segments
    /// Examples: "title", "body.intro", "questions[0].prompt"
    pub fn parse(path: &'a str) -> impl Iterator<Item = PathSegment<'a>> {
        PathParser { path, pos: 0 }
    }
}

/// Validate a content path: non-empty, and every segment well formed
pub fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::Validation("content_path cannot be empty".into()));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("content_path contains whitespace: {:?}", path)));
    }
    if PathSegment::parse(path).next().is_none() {
        return Err(Error::Validation(format!("content_path has no segments: {:?}", path)));
    }
    Ok(())
}

struct PathParser<'a> {
    path: &'a str,
    pos: usize,
}

impl<'a> Iterator for PathParser<'a> {
    type Item = PathSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.path.len() {
            return None;
        }

        let remaining = &self.path[self.pos..];
        let remaining = remaining.strip_prefix('.').unwrap_or(remaining);
        if remaining.is_empty() {
            self.pos = self.path.len();
            return None;
        }
        self.pos = self.path.len() - remaining.len();

        if remaining.starts_with('[') {
            if let Some(end) = remaining.find(']') {
                let idx_str = &remaining[1..end];
                self.pos += end + 1;
                if let Ok(idx) = idx_str.parse::<usize>() {
                    return Some(PathSegment::Index(idx));
                }
                return self.next();
            }
        }

        let end = remaining
            .find(|c| c == '.' || c == '[')
            .unwrap_or(remaining.len());

        let key = &remaining[..end];
        self.pos += end;

        if key.is_empty() {
            // a lone '[' with no closing bracket
            self.pos += 1;
            self.next()
        } else {
            Some(PathSegment::Key(key))
        }
    }
}

/// Number of characters (not bytes) in a string
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `char_idx`-th character, or the string length past the end
pub(crate) fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Replace the character range `[start, end)` of `s` with `replacement`.
/// Returns the new string and the removed text.
pub(crate) fn splice(s: &str, start: usize, end: usize, replacement: &str) -> (String, String) {
    let from = byte_offset(s, start);
    let to = byte_offset(s, end);
    let mut out = String::with_capacity(s.len() - (to - from) + replacement.len());
    out.push_str(&s[..from]);
    out.push_str(replacement);
    out.push_str(&s[to..]);
    (out, s[from..to].to_string())
}
