#![forbid(unsafe_code)]

//! Serialized deltas and the string-level codec.
//!
//! A serialized delta is the standard, padded base64 of the CBOR encoding
//! of the delta's JSON wire form. [`SerializedCodec`] mirrors every delta
//! operation at the string level and is total: failures are logged at
//! `debug` and reported as `None`.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::debug;

use crate::changelog::{ChangeLog, changelogs};
use crate::delta::{Delta, DeltaFormatError};
use crate::diff::DiffPatcher;
use crate::format::{ChangelogFormat, format_delta};
use crate::options::DiffOptions;

/// Why a serialized delta could not be produced or read.
#[derive(Debug)]
pub enum CodecError {
    /// CBOR encoding failed.
    Encode(String),
    /// CBOR decoding failed.
    Decode(String),
    /// The text is not valid base64.
    Base64(base64::DecodeError),
    /// The decoded value is not a delta.
    Format(DeltaFormatError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "cbor encode failed: {msg}"),
            Self::Decode(msg) => write!(f, "cbor decode failed: {msg}"),
            Self::Base64(err) => write!(f, "base64 decode failed: {err}"),
            Self::Format(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Base64(err) => Some(err),
            Self::Format(err) => Some(err),
            Self::Encode(_) | Self::Decode(_) => None,
        }
    }
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64(err)
    }
}

impl From<DeltaFormatError> for CodecError {
    fn from(err: DeltaFormatError) -> Self {
        Self::Format(err)
    }
}

/// Encode a delta as base64 CBOR.
pub fn encode_delta(delta: &Delta) -> Result<String, CodecError> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(&delta.to_value(), &mut buffer)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(buffer))
}

/// Decode a delta from base64 CBOR.
pub fn decode_delta(encoded: &str) -> Result<Delta, CodecError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let wire: Value =
        ciborium::de::from_reader(bytes.as_slice()).map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(Delta::from_value(&wire)?)
}

/// String-level twin of [`DiffPatcher`].
#[derive(Debug, Clone, Default)]
pub struct SerializedCodec {
    differ: DiffPatcher,
}

impl SerializedCodec {
    #[must_use]
    pub fn new(options: DiffOptions) -> Self {
        Self {
            differ: DiffPatcher::new(options),
        }
    }

    /// The underlying structural differ.
    #[must_use]
    pub fn differ(&self) -> &DiffPatcher {
        &self.differ
    }

    /// Encode, logging failures.
    #[must_use]
    pub fn encode_delta(&self, delta: &Delta) -> Option<String> {
        encode_delta(delta)
            .inspect_err(|err| debug!(error = %err, "delta encode failed"))
            .ok()
    }

    /// Decode, logging failures.
    #[must_use]
    pub fn decode_delta(&self, encoded: &str) -> Option<Delta> {
        decode_delta(encoded)
            .inspect_err(|err| debug!(error = %err, "delta decode failed"))
            .ok()
    }

    /// Encode each delta; `None` if any fails.
    #[must_use]
    pub fn encode_deltas(&self, deltas: &[Delta]) -> Option<Vec<String>> {
        deltas.iter().map(|d| self.encode_delta(d)).collect()
    }

    /// Decode each delta; `None` if any fails.
    #[must_use]
    pub fn decode_deltas<S: AsRef<str>>(&self, encoded: &[S]) -> Option<Vec<Delta>> {
        encoded.iter().map(|e| self.decode_delta(e.as_ref())).collect()
    }

    /// Serialized delta turning `left` into `right`; `None` when equal.
    #[must_use]
    pub fn diff(&self, left: &Value, right: &Value) -> Option<String> {
        let delta = self.differ.diff(left, right)?;
        self.encode_delta(&delta)
    }

    /// Serialized deltas between consecutive values. Equal neighbours are
    /// skipped, so the result can be shorter than `values.len() - 1`.
    #[must_use]
    pub fn diffs(&self, values: &[Value]) -> Vec<String> {
        values
            .windows(2)
            .filter_map(|pair| self.diff(&pair[0], &pair[1]))
            .collect()
    }

    /// Apply a serialized delta.
    #[must_use]
    pub fn patch(&self, value: &Value, encoded: &str) -> Option<Value> {
        let delta = self.decode_delta(encoded)?;
        self.differ
            .patch(value, &delta)
            .inspect_err(|err| debug!(error = %err, "patch failed"))
            .ok()
    }

    /// Apply serialized deltas in order.
    #[must_use]
    pub fn patches<S: AsRef<str>>(&self, value: &Value, encoded: &[S]) -> Option<Value> {
        encoded
            .iter()
            .try_fold(value.clone(), |acc, e| self.patch(&acc, e.as_ref()))
    }

    /// Revert a serialized delta.
    #[must_use]
    pub fn unpatch(&self, value: &Value, encoded: &str) -> Option<Value> {
        let delta = self.decode_delta(encoded)?;
        self.differ
            .unpatch(value, &delta)
            .inspect_err(|err| debug!(error = %err, "unpatch failed"))
            .ok()
    }

    /// Revert serialized deltas, last one first.
    #[must_use]
    pub fn unpatches<S: AsRef<str>>(&self, value: &Value, encoded: &[S]) -> Option<Value> {
        encoded
            .iter()
            .rev()
            .try_fold(value.clone(), |acc, e| self.unpatch(&acc, e.as_ref()))
    }

    /// Serialized reverse of a serialized delta.
    #[must_use]
    pub fn reverse(&self, encoded: &str) -> Option<String> {
        let delta = self.decode_delta(encoded)?;
        self.encode_delta(&self.differ.reverse(&delta))
    }

    /// Change list of a serialized delta against `original`.
    #[must_use]
    pub fn changelogs(&self, encoded: &str, original: &Value) -> Option<Vec<ChangeLog>> {
        let delta = self.decode_delta(encoded)?;
        changelogs(original, &delta)
            .inspect_err(|err| debug!(error = %err, "changelog rendering failed"))
            .ok()
    }

    /// Formatted rendering of a serialized delta against `original`.
    #[must_use]
    pub fn changelogs_formatted(
        &self,
        encoded: &str,
        original: &Value,
        format: ChangelogFormat,
    ) -> Option<String> {
        let delta = self.decode_delta(encoded)?;
        format_delta(original, &delta, format)
            .inspect_err(|err| debug!(error = %err, ?format, "delta formatting failed"))
            .ok()
    }
}
