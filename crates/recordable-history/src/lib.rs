#![forbid(unsafe_code)]

//! Undo/redo history for reactive stores.
//!
//! A [`Recordable`] watches a [`Writable`](recordable_store::Writable) and
//! records every change as a compact serialized delta (CBOR + base64, see
//! `recordable-delta`). Records can be undone and redone, inspected as
//! change lists, and persisted through a [`HistoryStorage`] backend.
//!
//! # Key Components
//!
//! - [`Recordable`] - The recording engine
//! - [`RecordableConfig`] - Autostart, record limit and diff options
//! - [`RecordEvent`] - Index and record-list notifications
//! - [`RecordData`] / [`HistoryStorage`] - Persistence
//!
//! # Example
//!
//! ```
//! use recordable_history::{Recordable, RecordableConfig};
//! use recordable_store::Writable;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Counter {
//!     count: i32,
//! }
//!
//! let history = Recordable::new(Writable::new(Counter { count: 0 }), RecordableConfig::default());
//! history.set(Counter { count: 1 });
//! history.set(Counter { count: 2 });
//!
//! assert!(history.undo());
//! assert_eq!(history.get(), Counter { count: 1 });
//! assert!(history.redo());
//! assert_eq!(history.get(), Counter { count: 2 });
//! assert_eq!(history.get_current_record_index(), 2);
//! ```

pub mod config;
pub mod event;
pub mod recordable;
pub mod storage;

pub use config::RecordableConfig;
pub use event::{EventSubscription, RecordEvent, RecordStatus};
pub use recordable::{NO_RECORD_INDEX, Recordable};
#[cfg(feature = "file-storage")]
pub use storage::JsonFileStorage;
pub use storage::{HistoryStorage, MemoryStorage, RecordData, StorageError};
