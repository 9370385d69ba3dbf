#![forbid(unsafe_code)]

//! Reactive stores for Recordable.
//!
//! This crate provides the publish/subscribe substrate that the history
//! engine in `recordable-history` records from.
//!
//! # Key Components
//!
//! - [`Writable`] - Shared value with synchronous, breadth-first notification
//! - [`Readable`] - Read-only store, optionally driven by a start notifier
//! - [`derived`] / [`derived_with`] / [`map`] - Stores computed from other stores
//! - [`BatchScope`] - Defers delivery so multi-source updates settle first
//! - [`Store`] - The read/subscribe contract shared by all of the above
//!
//! # Example
//!
//! ```
//! use recordable_store::{BatchScope, Store, Writable, derived};
//!
//! let width = Writable::new(2);
//! let height = Writable::new(3);
//! let area = derived(vec![width.clone(), height.clone()], |v: &[u32]| v[0] * v[1]);
//!
//! let _sub = area.subscribe(|a| println!("area = {a}"));
//! {
//!     let _batch = BatchScope::new();
//!     width.set(4);
//!     height.set(5);
//! } // area recomputes once: 20
//! assert_eq!(area.get(), 20);
//! ```

pub mod derived;
pub mod queue;
pub mod readable;
pub mod writable;

pub use derived::{Cleanup, derived, derived_with, map};
pub use queue::{BatchScope, is_batching};
pub use readable::{Readable, Store};
pub use writable::{Setter, StartNotifier, Stop, Unsubscriber, Writable};
