#![forbid(unsafe_code)]

//! Recordable public facade crate.
//!
//! Re-exports the stores, the delta codec and the history engine, plus the
//! small construction helpers most applications start from.
//!
//! ```
//! use recordable::prelude::*;
//!
//! let history = recordable(vec![1, 2, 3], RecordableConfig::default());
//! history.update(|mut v| {
//!     v.push(4);
//!     v
//! });
//! assert!(history.undo());
//! assert_eq!(history.get(), vec![1, 2, 3]);
//! ```

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

// --- Store re-exports ------------------------------------------------------

pub use recordable_store::{
    BatchScope, Cleanup, Readable, Setter, Stop, Store, Unsubscriber, Writable, derived,
    derived_with, map,
};

// --- Delta re-exports ------------------------------------------------------

pub use recordable_delta::{
    ChangeLog, ChangeOp, ChangelogFormat, CodecError, Delta, DiffOptions, DiffPatcher, PatchError,
    SerializedCodec,
};

// --- History re-exports ----------------------------------------------------

#[cfg(feature = "file-storage")]
pub use recordable_history::JsonFileStorage;
pub use recordable_history::{
    EventSubscription, HistoryStorage, MemoryStorage, RecordData, RecordEvent, RecordStatus,
    Recordable, RecordableConfig, StorageError,
};

// --- Helpers ---------------------------------------------------------------

/// A writable store holding `value`.
#[must_use]
pub fn writable<T: Clone + 'static>(value: T) -> Writable<T> {
    Writable::new(value)
}

/// A constant read-only store.
#[must_use]
pub fn readable<T: Clone + 'static>(value: T) -> Readable<T> {
    Readable::new(value)
}

/// A read-only store fed by `start` while it has subscribers.
#[must_use]
pub fn readable_with<T: Clone + 'static>(
    value: T,
    start: impl Fn(Setter<T>) -> Option<Stop> + 'static,
) -> Readable<T> {
    Readable::with_start(value, start)
}

/// A recorded store holding `value`.
#[must_use]
pub fn recordable<T>(value: T, config: RecordableConfig) -> Recordable<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    Recordable::new(Writable::new(value), config)
}

/// Decode one serialized record, as stored by [`Recordable::get_records`].
pub fn decode_record(encoded: &str) -> Result<Delta> {
    Ok(recordable_delta::decode_delta(encoded)?)
}

/// Read persisted history from `storage` without attaching it to a store.
///
/// `Ok(None)` when the backend holds nothing yet.
pub async fn load_history<T: DeserializeOwned>(
    storage: &impl HistoryStorage,
) -> Result<Option<RecordData<T>>> {
    match storage.load().await? {
        Some(data) => Ok(Some(data.into_typed()?)),
        None => Ok(None),
    }
}

// --- Errors ---------------------------------------------------------------

/// Top-level error returned by [`decode_record`] and [`load_history`].
#[derive(Debug)]
pub enum Error {
    /// A serialized delta could not be encoded or decoded.
    Codec(CodecError),
    /// A delta does not apply to a value.
    Patch(PatchError),
    /// History could not be loaded or saved.
    Storage(StorageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(err) => write!(f, "{err}"),
            Self::Patch(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Patch(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl From<PatchError> for Error {
    fn from(err: PatchError) -> Self {
        Self::Patch(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Result of the fallible facade helpers.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        BatchScope, ChangelogFormat, Error, RecordEvent, RecordStatus, Recordable,
        RecordableConfig, Result, Store, Writable, derived, readable, recordable, writable,
    };

    pub use crate::{delta, history, store};
}

pub use recordable_delta as delta;
pub use recordable_history as history;
pub use recordable_store as store;
