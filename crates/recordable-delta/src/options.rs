#![forbid(unsafe_code)]

//! Diff configuration.

use serde::{Deserialize, Serialize};

/// Options controlling how deltas are computed.
///
/// The defaults are the ones history recording uses:
/// - array moves are detected, without repeating the moved value
/// - every non-empty string pair is text-diffed
/// - object keys starting with `$` are ignored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiffOptions {
    /// Pair equal removed and inserted array items into moves.
    pub detect_move: bool,
    /// Keep the moved value in move entries.
    pub include_value_on_move: bool,
    /// Minimum char length both strings need before a text patch is used
    /// instead of a plain replacement.
    pub text_diff_min_length: usize,
    /// Object keys starting with this prefix are never diffed.
    pub ignored_prefix: Option<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            detect_move: true,
            include_value_on_move: false,
            text_diff_min_length: 1,
            ignored_prefix: Some("$".to_string()),
        }
    }
}

impl DiffOptions {
    /// Create options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set move detection.
    #[must_use]
    pub fn detect_move(mut self, enabled: bool) -> Self {
        self.detect_move = enabled;
        self
    }

    /// Set whether move entries carry the moved value.
    #[must_use]
    pub fn include_value_on_move(mut self, enabled: bool) -> Self {
        self.include_value_on_move = enabled;
        self
    }

    /// Set the text-diff threshold. `usize::MAX` disables text patches.
    #[must_use]
    pub fn text_diff_min_length(mut self, min: usize) -> Self {
        self.text_diff_min_length = min;
        self
    }

    /// Set or clear the ignored key prefix.
    #[must_use]
    pub fn ignored_prefix(mut self, prefix: Option<impl Into<String>>) -> Self {
        self.ignored_prefix = prefix.map(Into::into);
        self
    }

    /// Whether `key` is excluded from diffing.
    #[must_use]
    pub fn is_ignored(&self, key: &str) -> bool {
        self.ignored_prefix
            .as_deref()
            .is_some_and(|prefix| !prefix.is_empty() && key.starts_with(prefix))
    }

    /// Whether two strings qualify for a text patch.
    #[must_use]
    pub fn uses_text_diff(&self, old: &str, new: &str) -> bool {
        old.chars().count() >= self.text_diff_min_length
            && new.chars().count() >= self.text_diff_min_length
    }
}
