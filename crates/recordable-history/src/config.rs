#![forbid(unsafe_code)]

//! Engine configuration.

use recordable_delta::DiffOptions;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Recordable`](crate::Recordable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordableConfig {
    /// Start recording on construction.
    pub autostart: bool,
    /// Maximum number of records kept (`None` or `Some(0)` = unlimited).
    pub limit: Option<usize>,
    /// How deltas are computed.
    pub diff_options: DiffOptions,
}

impl Default for RecordableConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            limit: None,
            diff_options: DiffOptions::default(),
        }
    }
}

impl RecordableConfig {
    /// Create a configuration keeping at most `limit` records.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Create a configuration with no record limit.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Set whether recording starts on construction.
    #[must_use]
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Set the record limit.
    #[must_use]
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Set the diff options.
    #[must_use]
    pub fn diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }
}

/// A zero limit means no limit.
pub(crate) fn effective_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|limit| *limit > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RecordableConfig::default();
        assert!(config.autostart);
        assert_eq!(config.limit, None);
        assert_eq!(config.diff_options, DiffOptions::default());
    }

    #[test]
    fn builder() {
        let config = RecordableConfig::new(10)
            .autostart(false)
            .diff_options(DiffOptions::new().detect_move(false));
        assert_eq!(config.limit, Some(10));
        assert!(!config.autostart);
        assert!(!config.diff_options.detect_move);
        assert_eq!(RecordableConfig::unlimited().limit(None).limit, None);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        assert_eq!(effective_limit(Some(0)), None);
        assert_eq!(effective_limit(Some(3)), Some(3));
        assert_eq!(effective_limit(None), None);
    }

    #[test]
    fn reads_from_json() {
        let config: RecordableConfig =
            serde_json::from_str(r#"{"limit": 50, "diffOptions": {"detectMove": false}}"#)
                .unwrap();
        assert!(config.autostart);
        assert_eq!(config.limit, Some(50));
        assert!(!config.diff_options.detect_move);
        assert_eq!(config.diff_options.text_diff_min_length, 1);
    }
}
