#![forbid(unsafe_code)]

//! Applying, reverting and reversing deltas.
//!
//! Patching is strict: replaced and removed values must equal what the delta
//! recorded, text hunks must match, and array indices must be in range. A
//! value that drifted away from the delta's origin is reported as a
//! [`PatchError`] rather than patched into something unintended.
//!
//! Array deltas are applied in three passes:
//!
//! 1. remove deleted and moved-away items, highest original index first
//! 2. insert added and moved items, lowest new index first
//! 3. patch the remaining entries in place at their new index

use std::fmt;

use serde_json::Value;

use crate::delta::{ArrayDelta, ArrayRemoval, Delta, escape_pointer};
use crate::text::TextPatchError;

/// Why a delta could not be applied to a value.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    /// The value at `path` is not the container kind the delta expects.
    TypeMismatch { path: String, expected: &'static str },
    /// The value at `path` differs from the one the delta recorded.
    ValueMismatch { path: String },
    /// An object key the delta changes does not exist.
    MissingKey { path: String },
    /// An array index is past the end.
    IndexOutOfRange { path: String, index: usize, len: usize },
    /// A text hunk does not match the string at `path`.
    Text { path: String, source: TextPatchError },
    /// The delta itself is not well formed.
    Malformed { path: String, reason: &'static str },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { path, expected } => {
                write!(f, "expected {expected} at {}", display_path(path))
            }
            Self::ValueMismatch { path } => {
                write!(f, "value at {} drifted from the delta", display_path(path))
            }
            Self::MissingKey { path } => write!(f, "missing key {}", display_path(path)),
            Self::IndexOutOfRange { path, index, len } => write!(
                f,
                "index {index} out of range for array of length {len} at {}",
                display_path(path)
            ),
            Self::Text { path, source } => write!(f, "{source} ({})", display_path(path)),
            Self::Malformed { path, reason } => {
                write!(f, "malformed delta at {}: {reason}", display_path(path))
            }
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Text { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

/// Apply `delta` to a copy of `value`.
pub fn patch(value: &Value, delta: &Delta) -> Result<Value, PatchError> {
    let mut target = value.clone();
    apply(&mut target, delta, "")?;
    Ok(target)
}

/// Revert `delta` on a copy of `value`.
pub fn unpatch(value: &Value, delta: &Delta) -> Result<Value, PatchError> {
    patch(value, &reverse(delta))
}

/// The delta that undoes `delta`.
#[must_use]
pub fn reverse(delta: &Delta) -> Delta {
    match delta {
        Delta::Added(new) => Delta::Deleted(new.clone()),
        Delta::Deleted(old) => Delta::Added(old.clone()),
        Delta::Modified { old, new } => Delta::Modified {
            old: new.clone(),
            new: old.clone(),
        },
        Delta::Text(text) => Delta::Text(text.reverse()),
        Delta::Object(entries) => Delta::Object(
            entries
                .iter()
                .map(|(key, child)| (key.clone(), reverse(child)))
                .collect(),
        ),
        Delta::Array(array) => Delta::Array(reverse_array(array)),
    }
}

fn reverse_array(array: &ArrayDelta) -> ArrayDelta {
    let mut reversed = ArrayDelta::default();
    for (&from, removal) in &array.before {
        match removal {
            ArrayRemoval::Deleted(old) => {
                reversed.after.insert(from, Delta::Added(old.clone()));
            }
            ArrayRemoval::Moved { to, value } => {
                reversed.before.insert(
                    *to,
                    ArrayRemoval::Moved {
                        to: from,
                        value: value.clone(),
                    },
                );
            }
        }
    }
    for (&index, child) in &array.after {
        match child {
            Delta::Added(new) => {
                reversed.before.insert(index, ArrayRemoval::Deleted(new.clone()));
            }
            other => {
                if let Some(original) = array.original_index(index) {
                    reversed.after.insert(original, reverse(other));
                }
            }
        }
    }
    reversed
}

fn apply(target: &mut Value, delta: &Delta, path: &str) -> Result<(), PatchError> {
    match delta {
        Delta::Added(new) => *target = new.clone(),
        Delta::Modified { old, new } => {
            if target != old {
                return Err(PatchError::ValueMismatch {
                    path: path.to_string(),
                });
            }
            *target = new.clone();
        }
        Delta::Deleted(old) => {
            if target != old {
                return Err(PatchError::ValueMismatch {
                    path: path.to_string(),
                });
            }
            *target = Value::Null;
        }
        Delta::Text(text) => {
            let Value::String(current) = target else {
                return Err(PatchError::TypeMismatch {
                    path: path.to_string(),
                    expected: "string",
                });
            };
            *current = text.apply(current).map_err(|source| PatchError::Text {
                path: path.to_string(),
                source,
            })?;
        }
        Delta::Object(entries) => {
            let Value::Object(map) = target else {
                return Err(PatchError::TypeMismatch {
                    path: path.to_string(),
                    expected: "object",
                });
            };
            for (key, child) in entries {
                let child_path = format!("{path}/{}", escape_pointer(key));
                match child {
                    Delta::Added(new) => {
                        map.insert(key.clone(), new.clone());
                    }
                    Delta::Deleted(old) => match map.remove(key) {
                        Some(current) if current == *old => {}
                        Some(_) => return Err(PatchError::ValueMismatch { path: child_path }),
                        None => return Err(PatchError::MissingKey { path: child_path }),
                    },
                    other => {
                        let slot = map
                            .get_mut(key)
                            .ok_or_else(|| PatchError::MissingKey {
                                path: child_path.clone(),
                            })?;
                        apply(slot, other, &child_path)?;
                    }
                }
            }
        }
        Delta::Array(array) => {
            let Value::Array(items) = target else {
                return Err(PatchError::TypeMismatch {
                    path: path.to_string(),
                    expected: "array",
                });
            };
            apply_array(items, array, path)?;
        }
    }
    Ok(())
}

fn apply_array(items: &mut Vec<Value>, array: &ArrayDelta, path: &str) -> Result<(), PatchError> {
    let mut placements: Vec<(usize, Value)> = Vec::new();

    for (&index, removal) in array.before.iter().rev() {
        if index >= items.len() {
            return Err(PatchError::IndexOutOfRange {
                path: path.to_string(),
                index,
                len: items.len(),
            });
        }
        let item = items.remove(index);
        match removal {
            ArrayRemoval::Deleted(old) => {
                if item != *old {
                    return Err(PatchError::ValueMismatch {
                        path: format!("{path}/{index}"),
                    });
                }
            }
            ArrayRemoval::Moved { to, .. } => placements.push((*to, item)),
        }
    }

    for (&index, child) in &array.after {
        if let Delta::Added(new) = child {
            placements.push((index, new.clone()));
        }
    }
    placements.sort_by_key(|(index, _)| *index);
    for (index, item) in placements {
        if index > items.len() {
            return Err(PatchError::IndexOutOfRange {
                path: path.to_string(),
                index,
                len: items.len(),
            });
        }
        items.insert(index, item);
    }

    for (&index, child) in &array.after {
        let child_path = format!("{path}/{index}");
        match child {
            Delta::Added(_) => {}
            Delta::Deleted(_) => {
                return Err(PatchError::Malformed {
                    path: child_path,
                    reason: "deletion keyed by new array index",
                });
            }
            other => {
                let len = items.len();
                let slot = items.get_mut(index).ok_or(PatchError::IndexOutOfRange {
                    path: path.to_string(),
                    index,
                    len,
                })?;
                apply(slot, other, &child_path)?;
            }
        }
    }
    Ok(())
}
