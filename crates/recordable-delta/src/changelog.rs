#![forbid(unsafe_code)]

//! Flattening deltas into JSON-patch style change lists.
//!
//! Each entry addresses the document as it stands after the previous
//! entries, so the list can be replayed in order with [`apply_changelogs`].
//! Array changes are emitted as removals (highest index first), then
//! placements (insertions and moves, in final order), then nested changes at
//! their final index.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delta::{ArrayDelta, ArrayRemoval, Delta, escape_pointer};
use crate::patch::PatchError;

/// Kind of a [`ChangeLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Remove,
    Replace,
    Move,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Move => "move",
        })
    }
}

/// One path-addressed edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLog {
    pub op: ChangeOp,
    /// JSON pointer of the target location.
    pub path: String,
    /// JSON pointer of the source location, for moves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// New value, for additions and replacements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ChangeLog {
    fn add(path: String, value: Value) -> Self {
        Self {
            op: ChangeOp::Add,
            path,
            from: None,
            value: Some(value),
        }
    }

    fn remove(path: String) -> Self {
        Self {
            op: ChangeOp::Remove,
            path,
            from: None,
            value: None,
        }
    }

    fn replace(path: String, value: Value) -> Self {
        Self {
            op: ChangeOp::Replace,
            path,
            from: None,
            value: Some(value),
        }
    }

    fn moved(from: String, path: String) -> Self {
        Self {
            op: ChangeOp::Move,
            path,
            from: Some(from),
            value: None,
        }
    }
}

/// Flatten `delta`, taken against `original`, into an ordered change list.
pub fn changelogs(original: &Value, delta: &Delta) -> Result<Vec<ChangeLog>, PatchError> {
    let mut out = Vec::new();
    emit(Some(original), delta, "", &mut out)?;
    Ok(out)
}

fn emit(
    original: Option<&Value>,
    delta: &Delta,
    path: &str,
    out: &mut Vec<ChangeLog>,
) -> Result<(), PatchError> {
    let require = |expected: &'static str| PatchError::TypeMismatch {
        path: path.to_string(),
        expected,
    };
    match delta {
        Delta::Added(new) => out.push(ChangeLog::add(path.to_string(), new.clone())),
        Delta::Modified { new, .. } => out.push(ChangeLog::replace(path.to_string(), new.clone())),
        Delta::Deleted(_) => out.push(ChangeLog::remove(path.to_string())),
        Delta::Text(text) => {
            let Some(Value::String(current)) = original else {
                return Err(require("string"));
            };
            let patched = text.apply(current).map_err(|source| PatchError::Text {
                path: path.to_string(),
                source,
            })?;
            out.push(ChangeLog::replace(path.to_string(), Value::String(patched)));
        }
        Delta::Object(entries) => {
            let Some(Value::Object(map)) = original else {
                return Err(require("object"));
            };
            for (key, child) in entries {
                let child_path = format!("{path}/{}", escape_pointer(key));
                emit(map.get(key), child, &child_path, out)?;
            }
        }
        Delta::Array(array) => {
            let Some(Value::Array(items)) = original else {
                return Err(require("array"));
            };
            emit_array(items, array, path, out)?;
        }
    }
    Ok(())
}

/// An array slot during simulation: an original index or an inserted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Old(usize),
    New(usize),
}

fn position(slots: &[Slot], slot: Slot, path: &str) -> Result<usize, PatchError> {
    slots
        .iter()
        .position(|s| *s == slot)
        .ok_or(PatchError::Malformed {
            path: path.to_string(),
            reason: "array entries do not line up",
        })
}

fn emit_array(
    items: &[Value],
    array: &ArrayDelta,
    path: &str,
    out: &mut Vec<ChangeLog>,
) -> Result<(), PatchError> {
    if let Some((&index, _)) = array.before.last_key_value()
        && index >= items.len()
    {
        return Err(PatchError::IndexOutOfRange {
            path: path.to_string(),
            index,
            len: items.len(),
        });
    }

    let mut placements: Vec<(usize, Slot)> = array
        .before
        .iter()
        .filter_map(|(&from, removal)| match removal {
            ArrayRemoval::Moved { to, .. } => Some((*to, Slot::Old(from))),
            ArrayRemoval::Deleted(_) => None,
        })
        .chain(
            array
                .after
                .iter()
                .filter(|(_, delta)| matches!(delta, Delta::Added(_)))
                .map(|(&to, _)| (to, Slot::New(to))),
        )
        .collect();
    placements.sort_by_key(|(to, _)| *to);

    let mut layout: Vec<Slot> = (0..items.len())
        .filter(|index| !array.before.contains_key(index))
        .map(Slot::Old)
        .collect();
    for &(to, slot) in &placements {
        if to > layout.len() {
            return Err(PatchError::IndexOutOfRange {
                path: path.to_string(),
                index: to,
                len: layout.len(),
            });
        }
        layout.insert(to, slot);
    }

    let mut working: Vec<Slot> = (0..items.len()).map(Slot::Old).collect();
    for (&from, removal) in array.before.iter().rev() {
        if let ArrayRemoval::Deleted(_) = removal {
            let at = position(&working, Slot::Old(from), path)?;
            working.remove(at);
            out.push(ChangeLog::remove(format!("{path}/{at}")));
        }
    }

    for &(to, slot) in &placements {
        let anchor = |working: &[Slot]| -> Result<usize, PatchError> {
            if to == 0 {
                Ok(0)
            } else {
                Ok(position(working, layout[to - 1], path)? + 1)
            }
        };
        match slot {
            Slot::Old(_) => {
                let from = position(&working, slot, path)?;
                working.remove(from);
                let at = anchor(&working)?;
                working.insert(at, slot);
                if from != at {
                    out.push(ChangeLog::moved(
                        format!("{path}/{from}"),
                        format!("{path}/{at}"),
                    ));
                }
            }
            Slot::New(index) => {
                let at = anchor(&working)?;
                working.insert(at, slot);
                if let Some(Delta::Added(value)) = array.after.get(&index) {
                    out.push(ChangeLog::add(format!("{path}/{at}"), value.clone()));
                }
            }
        }
    }

    if working != layout {
        return Err(PatchError::Malformed {
            path: path.to_string(),
            reason: "array entries do not line up",
        });
    }

    for (&index, child) in &array.after {
        if matches!(child, Delta::Added(_)) {
            continue;
        }
        let child_path = format!("{path}/{index}");
        let Some(Slot::Old(from)) = layout.get(index).copied() else {
            return Err(PatchError::Malformed {
                path: child_path,
                reason: "nested change on an inserted item",
            });
        };
        emit(items.get(from), child, &child_path, out)?;
    }
    Ok(())
}

fn parse_pointer(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::Malformed {
            path: pointer.to_string(),
            reason: "pointer must start with '/'",
        });
    };
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn resolve_mut<'a>(
    root: &'a mut Value,
    segments: &[String],
    pointer: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| PatchError::MissingKey {
            path: pointer.to_string(),
        })?;
    }
    Ok(current)
}

fn array_index(segment: &str, len: usize, pointer: &str, allow_end: bool) -> Result<usize, PatchError> {
    let index = if allow_end && segment == "-" {
        len
    } else {
        segment.parse::<usize>().map_err(|_| PatchError::MissingKey {
            path: pointer.to_string(),
        })?
    };
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if index > limit || (!allow_end && len == 0) {
        return Err(PatchError::IndexOutOfRange {
            path: pointer.to_string(),
            index,
            len,
        });
    }
    Ok(index)
}

fn take(root: &mut Value, pointer: &str) -> Result<Value, PatchError> {
    let segments = parse_pointer(pointer)?;
    let Some((last, parents)) = segments.split_last() else {
        return Ok(std::mem::take(root));
    };
    match resolve_mut(root, parents, pointer)? {
        Value::Object(map) => map.remove(last).ok_or_else(|| PatchError::MissingKey {
            path: pointer.to_string(),
        }),
        Value::Array(items) => {
            let index = array_index(last, items.len(), pointer, false)?;
            Ok(items.remove(index))
        }
        _ => Err(PatchError::MissingKey {
            path: pointer.to_string(),
        }),
    }
}

fn put(root: &mut Value, pointer: &str, value: Value, insert: bool) -> Result<(), PatchError> {
    let segments = parse_pointer(pointer)?;
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };
    match resolve_mut(root, parents, pointer)? {
        Value::Object(map) => {
            if !insert && !map.contains_key(last) {
                return Err(PatchError::MissingKey {
                    path: pointer.to_string(),
                });
            }
            map.insert(last.clone(), value);
        }
        Value::Array(items) => {
            let index = array_index(last, items.len(), pointer, insert)?;
            if insert {
                items.insert(index, value);
            } else {
                items[index] = value;
            }
        }
        _ => {
            return Err(PatchError::TypeMismatch {
                path: pointer.to_string(),
                expected: "container",
            });
        }
    }
    Ok(())
}

/// Replay a change list against a copy of `value`.
pub fn apply_changelogs(value: &Value, changes: &[ChangeLog]) -> Result<Value, PatchError> {
    let mut doc = value.clone();
    for change in changes {
        let missing_value = || PatchError::Malformed {
            path: change.path.clone(),
            reason: "change has no value",
        };
        match change.op {
            ChangeOp::Add => {
                let value = change.value.clone().ok_or_else(missing_value)?;
                put(&mut doc, &change.path, value, true)?;
            }
            ChangeOp::Replace => {
                let value = change.value.clone().ok_or_else(missing_value)?;
                put(&mut doc, &change.path, value, false)?;
            }
            ChangeOp::Remove => {
                take(&mut doc, &change.path)?;
            }
            ChangeOp::Move => {
                let from = change.from.as_deref().ok_or(PatchError::Malformed {
                    path: change.path.clone(),
                    reason: "move has no source",
                })?;
                let moved = take(&mut doc, from)?;
                put(&mut doc, &change.path, moved, true)?;
            }
        }
    }
    Ok(doc)
}
