#![forbid(unsafe_code)]

//! Structural diffing.
//!
//! Arrays are compared by trimming the common head and tail, then matching
//! the middle with a longest common subsequence over deep equality.
//! Unmatched items that sit at the same offset inside a gap between matches
//! and are both objects (or both arrays) are diffed in place. Whatever is
//! left becomes deletions and insertions, and with move detection an equal
//! deletion/insertion pair is recorded as a move instead.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::delta::{ArrayDelta, ArrayRemoval, Delta};
use crate::options::DiffOptions;
use crate::patch::{self, PatchError};
use crate::text::TextPatch;

/// Computes and applies deltas with a fixed set of [`DiffOptions`].
#[derive(Debug, Clone, Default)]
pub struct DiffPatcher {
    options: DiffOptions,
}

impl DiffPatcher {
    #[must_use]
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// The delta turning `left` into `right`, or `None` when they are equal
    /// (ignored keys aside).
    #[must_use]
    pub fn diff(&self, left: &Value, right: &Value) -> Option<Delta> {
        if left == right {
            return None;
        }
        match (left, right) {
            (Value::Object(l), Value::Object(r)) => self.diff_object(l, r),
            (Value::Array(l), Value::Array(r)) => self.diff_array(l, r),
            (Value::String(l), Value::String(r)) if self.options.uses_text_diff(l, r) => {
                TextPatch::diff(l, r).map(Delta::Text)
            }
            _ => Some(Delta::Modified {
                old: left.clone(),
                new: right.clone(),
            }),
        }
    }

    /// Apply `delta` to `value`.
    pub fn patch(&self, value: &Value, delta: &Delta) -> Result<Value, PatchError> {
        patch::patch(value, delta)
    }

    /// Revert `delta` on `value`.
    pub fn unpatch(&self, value: &Value, delta: &Delta) -> Result<Value, PatchError> {
        patch::unpatch(value, delta)
    }

    /// The delta that undoes `delta`.
    #[must_use]
    pub fn reverse(&self, delta: &Delta) -> Delta {
        patch::reverse(delta)
    }

    fn diff_object(&self, left: &Map<String, Value>, right: &Map<String, Value>) -> Option<Delta> {
        let mut entries = BTreeMap::new();
        for (key, old) in left {
            if self.options.is_ignored(key) {
                continue;
            }
            match right.get(key) {
                Some(new) => {
                    if let Some(delta) = self.diff(old, new) {
                        entries.insert(key.clone(), delta);
                    }
                }
                None => {
                    entries.insert(key.clone(), Delta::Deleted(old.clone()));
                }
            }
        }
        for (key, new) in right {
            if !self.options.is_ignored(key) && !left.contains_key(key) {
                entries.insert(key.clone(), Delta::Added(new.clone()));
            }
        }
        (!entries.is_empty()).then_some(Delta::Object(entries))
    }

    fn diff_array(&self, left: &[Value], right: &[Value]) -> Option<Delta> {
        let head = left.iter().zip(right).take_while(|(l, r)| l == r).count();
        let max_tail = left.len().min(right.len()) - head;
        let tail = left
            .iter()
            .rev()
            .zip(right.iter().rev())
            .take(max_tail)
            .take_while(|(l, r)| l == r)
            .count();
        let old_mid = &left[head..left.len() - tail];
        let new_mid = &right[head..right.len() - tail];

        let mut array = ArrayDelta::default();
        let mut removed = Vec::new();
        let mut added = Vec::new();

        let gaps_end = std::iter::once((old_mid.len(), new_mid.len()));
        let (mut old_at, mut new_at) = (0, 0);
        for (old_match, new_match) in common_subsequence(old_mid, new_mid)
            .into_iter()
            .chain(gaps_end)
        {
            let old_gap = old_match - old_at;
            let new_gap = new_match - new_at;
            for offset in 0..old_gap.max(new_gap) {
                let old = (offset < old_gap).then(|| &old_mid[old_at + offset]);
                let new = (offset < new_gap).then(|| &new_mid[new_at + offset]);
                match (old, new) {
                    (Some(o), Some(n)) if same_container(o, n) => {
                        if let Some(delta) = self.diff(o, n) {
                            array.after.insert(head + new_at + offset, delta);
                        }
                    }
                    _ => {
                        if old.is_some() {
                            removed.push(head + old_at + offset);
                        }
                        if new.is_some() {
                            added.push(head + new_at + offset);
                        }
                    }
                }
            }
            old_at = old_match + 1;
            new_at = new_match + 1;
        }

        let mut moves: BTreeMap<usize, usize> = BTreeMap::new();
        if self.options.detect_move {
            let mut candidates = removed.clone();
            added.retain(|&to| {
                let Some(pos) = candidates.iter().position(|&from| left[from] == right[to]) else {
                    return true;
                };
                moves.insert(candidates.remove(pos), to);
                false
            });
        }

        for from in removed {
            let removal = match moves.get(&from) {
                Some(&to) => ArrayRemoval::Moved {
                    to,
                    value: self
                        .options
                        .include_value_on_move
                        .then(|| left[from].clone()),
                },
                None => ArrayRemoval::Deleted(left[from].clone()),
            };
            array.before.insert(from, removal);
        }
        for to in added {
            array.after.insert(to, Delta::Added(right[to].clone()));
        }

        (!array.is_empty()).then_some(Delta::Array(array))
    }
}

fn same_container(left: &Value, right: &Value) -> bool {
    matches!(
        (left, right),
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_))
    )
}

/// Index pairs of a longest common subsequence, ascending on both sides.
fn common_subsequence(left: &[Value], right: &[Value]) -> Vec<(usize, usize)> {
    let (n, m) = (left.len(), right.len());
    let mut lengths = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lengths[i][j] = if left[i] == right[j] {
                lengths[i + 1][j + 1] + 1
            } else {
                lengths[i + 1][j].max(lengths[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(lengths[0][0]);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if left[i] == right[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if lengths[i + 1][j] >= lengths[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn differ() -> DiffPatcher {
        DiffPatcher::default()
    }

    #[test]
    fn equal_values_have_no_delta() {
        for value in [
            json!(null),
            json!(1),
            json!("s"),
            json!([1, {"a": [2]}]),
            json!({"a": {"b": [1, 2, 3]}}),
        ] {
            assert_eq!(differ().diff(&value, &value), None);
        }
    }

    #[test]
    fn scalar_change_is_a_modification() {
        let delta = differ().diff(&json!({"count": 0}), &json!({"count": 1})).unwrap();
        assert_eq!(delta.to_value(), json!({"count": [0, 1]}));
    }

    #[test]
    fn ignored_keys_are_not_compared() {
        let left = json!({"$meta": 1, "v": 1});
        let right = json!({"$meta": 2, "v": 1});
        assert_eq!(differ().diff(&left, &right), None);

        let added = json!({"v": 1, "$tag": "x"});
        assert_eq!(differ().diff(&json!({"v": 1}), &added), None);

        let plain = DiffPatcher::new(DiffOptions::new().ignored_prefix(None::<String>));
        assert!(plain.diff(&left, &right).is_some());
    }

    #[test]
    fn strings_become_text_patches() {
        let delta = differ().diff(&json!("hello"), &json!("help")).unwrap();
        assert!(matches!(delta, Delta::Text(_)));

        let no_text = DiffPatcher::new(DiffOptions::new().text_diff_min_length(usize::MAX));
        let delta = no_text.diff(&json!("hello"), &json!("help")).unwrap();
        assert_eq!(delta.to_value(), json!(["hello", "help"]));
    }

    #[test]
    fn array_append_is_a_single_insertion() {
        let delta = differ().diff(&json!([1, 2]), &json!([1, 2, 3])).unwrap();
        assert_eq!(delta.to_value(), json!({"_t": "a", "2": [3]}));
    }

    #[test]
    fn array_removal_in_the_middle() {
        let delta = differ().diff(&json!([1, 2, 3]), &json!([1, 3])).unwrap();
        assert_eq!(delta.to_value(), json!({"_t": "a", "_1": [2, 0, 0]}));
    }

    #[test]
    fn swapped_items_become_a_move() {
        let delta = differ().diff(&json!(["a", "b"]), &json!(["b", "a"])).unwrap();
        let Delta::Array(array) = &delta else {
            panic!("expected array delta");
        };
        assert!(array.after.is_empty());
        assert_eq!(array.before.len(), 1);
        assert!(matches!(
            array.before.values().next(),
            Some(ArrayRemoval::Moved { value: None, .. })
        ));
    }

    #[test]
    fn moves_disabled_gives_delete_and_insert() {
        let differ = DiffPatcher::new(DiffOptions::new().detect_move(false));
        let delta = differ.diff(&json!(["a", "b"]), &json!(["b", "a"])).unwrap();
        let Delta::Array(array) = &delta else {
            panic!("expected array delta");
        };
        assert!(matches!(
            array.before.values().next(),
            Some(ArrayRemoval::Deleted(_))
        ));
        assert!(matches!(array.after.values().next(), Some(Delta::Added(_))));
    }

    #[test]
    fn include_value_on_move() {
        let differ = DiffPatcher::new(DiffOptions::new().include_value_on_move(true));
        let delta = differ.diff(&json!(["a", "b"]), &json!(["b", "a"])).unwrap();
        let Delta::Array(array) = &delta else {
            panic!("expected array delta");
        };
        assert!(matches!(
            array.before.values().next(),
            Some(ArrayRemoval::Moved { value: Some(_), .. })
        ));
    }

    #[test]
    fn objects_at_the_same_position_diff_in_place() {
        let left = json!([{"id": 1, "done": false}]);
        let right = json!([{"id": 1, "done": true}]);
        let delta = differ().diff(&left, &right).unwrap();
        assert_eq!(
            delta.to_value(),
            json!({"_t": "a", "0": {"done": [false, true]}})
        );
    }

    #[test]
    fn common_subsequence_pairs() {
        let left = [json!(1), json!(2), json!(3), json!(4)];
        let right = [json!(2), json!(4), json!(5)];
        assert_eq!(common_subsequence(&left, &right), vec![(1, 0), (3, 1)]);
        assert!(common_subsequence(&left, &[]).is_empty());
    }
}
