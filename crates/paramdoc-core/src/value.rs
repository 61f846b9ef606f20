//! Document value types
//!
//! Represents parameter values before and after resolution.
//! Values can be scalars (string, int, float, bool, null),
//! sequences (arrays), or mappings (objects).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A document value that may contain unresolved interpolations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[derive(Default)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value (may contain interpolations like ${..lr})
    String(String),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Check if this value is a sequence or mapping
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Sequence(_) | Value::Mapping(_))
    }

    /// Check if this value is the document's "unset" sentinel (null or empty string).
    ///
    /// `0` and `false` are set values.
    pub fn is_unset(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Truthiness used by conditional resolvers.
    ///
    /// Null, `false`, zero, and empty strings/sequences/mappings are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Sequence(seq) => !seq.is_empty(),
            Value::Mapping(map) => !map.is_empty(),
        }
    }

    /// Get as boolean if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float or Integer
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as slice if this is a Sequence
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Get as mapping if this is a Mapping
    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Type a bare scalar token the way a YAML loader would.
    ///
    /// `null`/`~` become Null, `true`/`false` (any case) become Bool, and
    /// numeric tokens become Integer or Float. Anything else stays a String.
    pub fn from_scalar(token: &str) -> Value {
        match token {
            "null" | "Null" | "NULL" | "~" => return Value::Null,
            _ => {}
        }
        if token.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if token.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if let Ok(i) = token.parse::<i64>() {
            return Value::Integer(i);
        }
        let numeric = !token.is_empty()
            && token.chars().any(|c| c.is_ascii_digit())
            && token
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
        if numeric {
            if let Ok(f) = token.parse::<f64>() {
                return Value::Float(f);
            }
        }
        Value::String(token.to_string())
    }

    /// Get a value by path (e.g., "train.lr" or "stages[0].name")
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        if path.is_empty() {
            return Ok(self);
        }

        let segments = parse_path(path)?;
        let mut current = self;

        for segment in &segments {
            current = match segment {
                PathSegment::Key(key) => match current {
                    Value::Mapping(map) => map
                        .get(key.as_str())
                        .ok_or_else(|| Error::path_not_found(path))?,
                    _ => return Err(Error::path_not_found(path)),
                },
                PathSegment::Index(idx) => match current {
                    Value::Sequence(seq) => {
                        seq.get(*idx).ok_or_else(|| Error::path_not_found(path))?
                    }
                    _ => return Err(Error::path_not_found(path)),
                },
            };
        }

        Ok(current)
    }

    /// Set a value at a path, creating intermediate mappings as needed
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        if path.is_empty() {
            *self = value;
            return Ok(());
        }

        let segments = parse_path(path)?;
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => {
                *self = value;
                return Ok(());
            }
        };

        let mut current = self;
        for (i, segment) in parents.iter().enumerate() {
            current = match segment {
                PathSegment::Key(key) => {
                    let Value::Mapping(map) = current else {
                        return Err(Error::path_not_found(path));
                    };
                    let next_is_index = matches!(
                        segments.get(i + 1),
                        Some(PathSegment::Index(_))
                    );
                    map.entry(key.clone()).or_insert_with(|| {
                        if next_is_index {
                            Value::Sequence(vec![])
                        } else {
                            Value::Mapping(IndexMap::new())
                        }
                    })
                }
                PathSegment::Index(idx) => {
                    let Value::Sequence(seq) = current else {
                        return Err(Error::path_not_found(path));
                    };
                    seq.get_mut(*idx)
                        .ok_or_else(|| Error::path_not_found(path))?
                }
            };
        }

        match (last, current) {
            (PathSegment::Key(key), Value::Mapping(map)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (PathSegment::Index(idx), Value::Sequence(seq)) if *idx < seq.len() => {
                seq[*idx] = value;
                Ok(())
            }
            _ => Err(Error::path_not_found(path)),
        }
    }

    /// Text used when the value is spliced into a string or an `eval` expression.
    ///
    /// Floats always keep a decimal point or exponent (`2.0`, `1e20`) so they
    /// read back as floats.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Float(f) => format!("{:?}", f),
            other => other.to_string(),
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Merge another value into this one.
    ///
    /// Merge semantics:
    /// - Mappings: Deep merge recursively
    /// - Scalars: `other` wins (last-writer-wins)
    /// - Sequences: `other` replaces entirely
    /// - Type mismatch: `other` wins
    pub fn merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Mapping(base), Value::Mapping(overlay)) => {
                for (key, overlay_value) in overlay {
                    if let Some(base_value) = base.get_mut(&key) {
                        base_value.merge(overlay_value);
                    } else {
                        base.insert(key, overlay_value);
                    }
                }
            }
            (this, other) => {
                *this = other;
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}

/// A segment in a path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A key in a mapping (e.g., "train" in "train.lr")
    Key(String),
    /// An index in a sequence (e.g., 0 in "stages[0]")
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// Parse a path string into segments
/// Supports: "key", "key.subkey", "key[0]", "key[0].subkey"
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut current_key = String::new();
    let mut chars = path.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '.' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
            }
            '[' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
                let mut index_str = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    index_str.push(c);
                }
                if !closed {
                    return Err(Error::parse("Unclosed '[' in path", offset, &path[offset..]));
                }
                let idx: usize = index_str.parse().map_err(|_| {
                    Error::parse(
                        format!("Invalid array index in path: {}", index_str),
                        offset,
                        &path[offset..],
                    )
                })?;
                segments.push(PathSegment::Index(idx));
            }
            ']' => {
                return Err(Error::parse("Unexpected ']' in path", offset, "]"));
            }
            _ => {
                current_key.push(c);
            }
        }
    }

    if !current_key.is_empty() {
        segments.push(PathSegment::Key(current_key));
    }

    Ok(segments)
}
