//! Path selectors into a record's JSON value.
//!
//! Paths mix dotted keys and bracketed indices: `a.b[2].c`. An empty path
//! addresses the root. Reads on a missing path return `None`; writes
//! materialize the intermediate containers they need - numeric index
//! segments create arrays (gap-filled with `null`), key segments create
//! objects, and a scalar in the way is replaced by the needed container.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from parsing a path string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A `[` without a matching `]`.
    #[error("unterminated index in path {0:?}")]
    UnterminatedIndex(String),

    /// A bracketed segment that is not a non-negative integer.
    #[error("invalid index {index:?} in path {path:?}")]
    InvalidIndex {
        /// The full path text.
        path: String,
        /// The offending bracket content.
        index: String,
    },

    /// Two dots in a row, or a dot at the edge of a segment.
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// The selector that addresses the whole document.
    pub fn root() -> Self {
        Self {
            raw: String::new(),
            segments: Vec::new(),
        }
    }

    /// Parse a path string. The empty string addresses the root.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        let mut rest = raw;
        // A '.' promises a key; '[' or end of input break that promise.
        let mut expect_key = false;

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix('.') {
                if segments.is_empty() || expect_key {
                    return Err(PathError::EmptySegment(raw.to_string()));
                }
                expect_key = true;
                rest = stripped;
                continue;
            }
            if let Some(stripped) = rest.strip_prefix('[') {
                if expect_key {
                    return Err(PathError::EmptySegment(raw.to_string()));
                }
                let Some(end) = stripped.find(']') else {
                    return Err(PathError::UnterminatedIndex(raw.to_string()));
                };
                let index = &stripped[..end];
                let parsed = index
                    .parse::<usize>()
                    .map_err(|_| PathError::InvalidIndex {
                        path: raw.to_string(),
                        index: index.to_string(),
                    })?;
                segments.push(Segment::Index(parsed));
                rest = &stripped[end + 1..];
                continue;
            }
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            segments.push(Segment::Key(rest[..end].to_string()));
            expect_key = false;
            rest = &rest[end..];
        }
        if expect_key {
            return Err(PathError::EmptySegment(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The path text this selector was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this selector addresses the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Read the value this path addresses, if present.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Key(key) => current.as_object()?.get(key)?,
                Segment::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }

    /// Write a value at this path, materializing intermediate containers.
    pub fn set(&self, root: &mut Value, value: Value) {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    match current {
                        Value::Object(map) => {
                            map.entry(key.clone()).or_insert(Value::Null)
                        }
                        _ => unreachable!("just ensured an object"),
                    }
                }
                Segment::Index(index) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    match current {
                        Value::Array(items) => {
                            while items.len() <= *index {
                                items.push(Value::Null);
                            }
                            &mut items[*index]
                        }
                        _ => unreachable!("just ensured an array"),
                    }
                }
            };
        }
        *current = value;
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
