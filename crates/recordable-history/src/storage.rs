#![forbid(unsafe_code)]

//! Persistence of history state.
//!
//! [`RecordData`] is the persisted triple: the serialized records, the
//! current record index and the live value. Backends implement
//! [`HistoryStorage`] over the JSON form of the value, so a single backend
//! serves every value type.
//!
//! # File Format
//!
//! ```json
//! {
//!   "records": ["oWVjb3VudIIAAQ=="],
//!   "currentRecordIndex": 1,
//!   "storeValue": { "count": 1 }
//! }
//! ```

use std::cell::RefCell;
use std::fmt;
use std::io;
#[cfg(feature = "file-storage")]
use std::path::{Path, PathBuf};
use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted history state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordData<T = Value> {
    /// Serialized deltas, oldest first.
    pub records: Vec<String>,
    /// Undo/redo position.
    pub current_record_index: i64,
    /// The value the records lead up to.
    pub store_value: T,
}

impl<T: Serialize> RecordData<T> {
    /// Convert the value to its JSON form.
    pub fn to_json(&self) -> Result<RecordData<Value>, StorageError> {
        Ok(RecordData {
            records: self.records.clone(),
            current_record_index: self.current_record_index,
            store_value: serde_json::to_value(&self.store_value)?,
        })
    }
}

impl RecordData<Value> {
    /// Read the value back from its JSON form.
    pub fn into_typed<T: serde::de::DeserializeOwned>(self) -> Result<RecordData<T>, StorageError> {
        Ok(RecordData {
            records: self.records,
            current_record_index: self.current_record_index,
            store_value: serde_json::from_value(self.store_value)?,
        })
    }
}

/// Why history could not be loaded or saved.
#[derive(Debug)]
pub enum StorageError {
    /// Filesystem failure.
    Io(io::Error),
    /// The stored document is not valid history JSON.
    Json(serde_json::Error),
    /// The backend refused or is not reachable.
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "history storage io error: {err}"),
            Self::Json(err) => write!(f, "history storage json error: {err}"),
            Self::Unavailable(msg) => write!(f, "history storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Asynchronous load/save capability for history state.
///
/// Engines and stores are single-threaded, so futures need not be `Send`.
#[async_trait(?Send)]
pub trait HistoryStorage {
    /// Load the stored history, `None` when nothing was stored yet.
    async fn load(&self) -> Result<Option<RecordData>, StorageError>;

    /// Store `data`, replacing what was there.
    async fn save(&self, data: &RecordData) -> Result<(), StorageError>;
}

/// In-process storage slot. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Rc<RefCell<Option<RecordData>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot pre-filled with `data`.
    #[must_use]
    pub fn with_data(data: RecordData) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(data))),
        }
    }

    /// What is currently stored.
    #[must_use]
    pub fn snapshot(&self) -> Option<RecordData> {
        self.slot.borrow().clone()
    }
}

#[async_trait(?Send)]
impl HistoryStorage for MemoryStorage {
    async fn load(&self) -> Result<Option<RecordData>, StorageError> {
        Ok(self.snapshot())
    }

    async fn save(&self, data: &RecordData) -> Result<(), StorageError> {
        *self.slot.borrow_mut() = Some(data.clone());
        Ok(())
    }
}

#[cfg(feature = "file-storage")]
/// History stored as a pretty-printed JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash never leaves a half-written history behind. A missing file
/// loads as `None`.
///
/// File I/O is blocking `std::fs` run inside the returned futures.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

#[cfg(feature = "file-storage")]
impl JsonFileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "file-storage")]
#[async_trait(?Send)]
impl HistoryStorage for JsonFileStorage {
    async fn load(&self) -> Result<Option<RecordData>, StorageError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn save(&self, data: &RecordData) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
