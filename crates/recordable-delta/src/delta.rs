#![forbid(unsafe_code)]

//! The structural delta model and its JSON wire shape.
//!
//! A [`Delta`] describes how to turn one JSON value into another. Its wire
//! shape follows the jsondiffpatch conventions so stored history stays
//! readable by other tooling:
//!
//! | Delta                | Wire form                      |
//! |----------------------|--------------------------------|
//! | added                | `[new]`                        |
//! | modified             | `[old, new]`                   |
//! | deleted              | `[old, 0, 0]`                  |
//! | text                 | `["@@ -s,n +s,m @@\n…", 0, 2]` |
//! | object               | `{"key": <delta>, …}`          |
//! | array                | `{"_t": "a", "3": …, "_1": …}` |
//! | moved (array only)   | `["", to, 3]`                  |
//!
//! Array entries keyed `"<i>"` address the new array; entries keyed
//! `"_<i>"` address the original array.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::text::TextPatch;

const ARRAY_MARKER_KEY: &str = "_t";
const ARRAY_MARKER: &str = "a";
const KIND_DELETED: u64 = 0;
const KIND_TEXT: u64 = 2;
const KIND_MOVED: u64 = 3;

/// A structural change between two JSON values.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// A value that did not exist before.
    Added(Value),
    /// A value replaced wholesale.
    Modified { old: Value, new: Value },
    /// A value that no longer exists.
    Deleted(Value),
    /// A string changed by a text patch.
    Text(TextPatch),
    /// Per-key changes inside an object.
    Object(BTreeMap<String, Delta>),
    /// Per-index changes inside an array.
    Array(ArrayDelta),
}

/// Changes inside an array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayDelta {
    /// Insertions and in-place changes, keyed by index in the new array.
    pub after: BTreeMap<usize, Delta>,
    /// Removals and moves, keyed by index in the original array.
    pub before: BTreeMap<usize, ArrayRemoval>,
}

/// An item that leaves its original array position.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayRemoval {
    /// The item is dropped.
    Deleted(Value),
    /// The item reappears at `to` in the new array.
    Moved { to: usize, value: Option<Value> },
}

impl ArrayDelta {
    /// True when the delta carries no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.after.is_empty() && self.before.is_empty()
    }

    /// Index in the original array of the item found at `new_index` in the
    /// patched array, or `None` when that item was inserted.
    #[must_use]
    pub fn original_index(&self, new_index: usize) -> Option<usize> {
        for (from, removal) in &self.before {
            if let ArrayRemoval::Moved { to, .. } = removal
                && *to == new_index
            {
                return Some(*from);
            }
        }
        if matches!(self.after.get(&new_index), Some(Delta::Added(_))) {
            return None;
        }

        let placed_before = self
            .after
            .iter()
            .filter(|(index, delta)| **index < new_index && matches!(delta, Delta::Added(_)))
            .count()
            + self
                .before
                .values()
                .filter(|removal| matches!(removal, ArrayRemoval::Moved { to, .. } if *to < new_index))
                .count();
        let rank = new_index - placed_before;

        // The rank-th original index that was neither deleted nor moved away.
        let mut seen = 0;
        let mut index = 0;
        loop {
            if !self.before.contains_key(&index) {
                if seen == rank {
                    return Some(index);
                }
                seen += 1;
            }
            index += 1;
        }
    }
}

/// The wire value did not have a recognizable delta shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFormatError {
    /// JSON-pointer-like location of the offending node.
    pub path: String,
    /// What was wrong.
    pub reason: String,
}

impl DeltaFormatError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DeltaFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "malformed delta at {path}: {}", self.reason)
    }
}

impl std::error::Error for DeltaFormatError {}

impl Delta {
    /// Encode into the jsondiffpatch-style wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Added(new) => json!([new]),
            Self::Modified { old, new } => json!([old, new]),
            Self::Deleted(old) => json!([old, KIND_DELETED, KIND_DELETED]),
            Self::Text(patch) => json!([patch.to_string(), KIND_DELETED, KIND_TEXT]),
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, delta)| (key.clone(), delta.to_value()))
                    .collect(),
            ),
            Self::Array(array) => {
                let mut map = Map::new();
                map.insert(ARRAY_MARKER_KEY.to_string(), json!(ARRAY_MARKER));
                for (index, delta) in &array.after {
                    map.insert(index.to_string(), delta.to_value());
                }
                for (index, removal) in &array.before {
                    let wire = match removal {
                        ArrayRemoval::Deleted(old) => json!([old, KIND_DELETED, KIND_DELETED]),
                        ArrayRemoval::Moved { to, value } => {
                            json!([value.clone().unwrap_or_else(|| json!("")), to, KIND_MOVED])
                        }
                    };
                    map.insert(format!("_{index}"), wire);
                }
                Value::Object(map)
            }
        }
    }

    /// Decode from the wire value.
    pub fn from_value(value: &Value) -> Result<Self, DeltaFormatError> {
        decode_node(value, "")
    }
}

fn decode_node(value: &Value, path: &str) -> Result<Delta, DeltaFormatError> {
    match value {
        Value::Array(items) => match items.as_slice() {
            [new] => Ok(Delta::Added(new.clone())),
            [old, new] => Ok(Delta::Modified {
                old: old.clone(),
                new: new.clone(),
            }),
            [payload, zero, kind] if zero.as_u64() == Some(0) => match kind.as_u64() {
                Some(KIND_DELETED) => Ok(Delta::Deleted(payload.clone())),
                Some(KIND_TEXT) => {
                    let text = payload
                        .as_str()
                        .ok_or_else(|| DeltaFormatError::new(path, "text delta is not a string"))?;
                    let patch = text
                        .parse::<TextPatch>()
                        .map_err(|err| DeltaFormatError::new(path, err.to_string()))?;
                    Ok(Delta::Text(patch))
                }
                _ => Err(DeltaFormatError::new(path, "unknown delta kind")),
            },
            [_, _, kind] if kind.as_u64() == Some(KIND_MOVED) => Err(DeltaFormatError::new(
                path,
                "move outside of an array delta",
            )),
            _ => Err(DeltaFormatError::new(
                path,
                format!("unexpected {}-element delta", items.len()),
            )),
        },
        Value::Object(map) if map.get(ARRAY_MARKER_KEY) == Some(&json!(ARRAY_MARKER)) => {
            decode_array(map, path).map(Delta::Array)
        }
        Value::Object(map) => {
            let mut entries = BTreeMap::new();
            for (key, child) in map {
                let child_path = format!("{path}/{}", escape_pointer(key));
                entries.insert(key.clone(), decode_node(child, &child_path)?);
            }
            Ok(Delta::Object(entries))
        }
        _ => Err(DeltaFormatError::new(path, "expected an array or object")),
    }
}

fn decode_array(map: &Map<String, Value>, path: &str) -> Result<ArrayDelta, DeltaFormatError> {
    let mut array = ArrayDelta::default();
    for (key, child) in map {
        if key == ARRAY_MARKER_KEY {
            continue;
        }
        let child_path = format!("{path}/{key}");
        if let Some(original) = key.strip_prefix('_') {
            let index = original
                .parse::<usize>()
                .map_err(|_| DeltaFormatError::new(&child_path, "bad array index"))?;
            array.before.insert(index, decode_removal(child, &child_path)?);
        } else {
            let index = key
                .parse::<usize>()
                .map_err(|_| DeltaFormatError::new(&child_path, "bad array index"))?;
            array.after.insert(index, decode_node(child, &child_path)?);
        }
    }
    Ok(array)
}

fn decode_removal(value: &Value, path: &str) -> Result<ArrayRemoval, DeltaFormatError> {
    match value.as_array().map(Vec::as_slice) {
        Some([old, zero, kind])
            if zero.as_u64() == Some(0) && kind.as_u64() == Some(KIND_DELETED) =>
        {
            Ok(ArrayRemoval::Deleted(old.clone()))
        }
        Some([payload, to, kind]) if kind.as_u64() == Some(KIND_MOVED) => {
            let to = to
                .as_u64()
                .and_then(|to| usize::try_from(to).ok())
                .ok_or_else(|| DeltaFormatError::new(path, "bad move target"))?;
            let value = match payload {
                Value::String(s) if s.is_empty() => None,
                other => Some(other.clone()),
            };
            Ok(ArrayRemoval::Moved { to, value })
        }
        _ => Err(DeltaFormatError::new(
            path,
            "original-index entry must be a deletion or a move",
        )),
    }
}

/// Escape a key for use as a JSON pointer segment (RFC 6901).
#[must_use]
pub fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Delta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(D::Error::custom)
    }
}
