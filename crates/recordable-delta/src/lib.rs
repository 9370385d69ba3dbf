#![forbid(unsafe_code)]

//! Recordable Delta
//!
//! Structural deltas between JSON values, in the jsondiffpatch wire shape.
//!
//! # Key Components
//!
//! - [`Delta`] - The delta model and its JSON wire form
//! - [`DiffPatcher`] - `diff`, `patch`, `unpatch` and `reverse` under [`DiffOptions`]
//! - [`TextPatch`] - Character-level string patches
//! - [`changelogs`] / [`apply_changelogs`] - JSON-patch style change lists
//! - [`format_delta`] - Console, annotated and HTML renderings
//! - [`SerializedCodec`] - The same operations over base64 CBOR strings
//!
//! # Example
//!
//! ```
//! use recordable_delta::SerializedCodec;
//! use serde_json::json;
//!
//! let codec = SerializedCodec::default();
//! let before = json!({"count": 0});
//! let after = json!({"count": 1});
//!
//! let record = codec.diff(&before, &after).unwrap();
//! assert_eq!(codec.patch(&before, &record), Some(after.clone()));
//! assert_eq!(codec.unpatch(&after, &record), Some(before));
//! ```

pub mod changelog;
pub mod codec;
pub mod delta;
pub mod diff;
pub mod format;
pub mod options;
pub mod patch;
pub mod text;

pub use changelog::{ChangeLog, ChangeOp, apply_changelogs, changelogs};
pub use codec::{CodecError, SerializedCodec, decode_delta, encode_delta};
pub use delta::{ArrayDelta, ArrayRemoval, Delta, DeltaFormatError};
pub use diff::DiffPatcher;
pub use format::{ChangelogFormat, format_delta};
pub use options::DiffOptions;
pub use patch::{PatchError, patch, reverse, unpatch};
pub use text::{Hunk, TextPatch, TextPatchError};
