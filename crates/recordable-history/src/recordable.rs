#![forbid(unsafe_code)]

//! The recording engine.
//!
//! A [`Recordable`] subscribes to a [`Writable`] and turns every external
//! write into a serialized delta against the previous value. The records
//! form a linear undo/redo log navigated by a current record index.
//!
//! # Invariants
//!
//! 1. `0 <= index <= records.len()` once a record exists; `-1` before that
//!    or after [`clear_records`](Recordable::clear_records).
//! 2. A new record while `index < records.len()` discards the redo branch.
//! 3. `records.len() <= limit` after every capture (limit `0` = unlimited).
//! 4. Writes issued by the engine itself (undo, redo, load, the
//!    `*_with_no_record` family) never become records.
//! 5. Undo and redo move the index only after the value was rebuilt; on
//!    failure index, records and value are untouched.
//! 6. Undo and redo announce the new index before writing the value back.
//!
//! # Silent writes
//!
//! Each store write produces exactly one queued run per subscriber, in
//! write order. The engine therefore knows which store version every run
//! delivers, and tags its own writes by the version they will create.
//! Runs carrying a tagged version refresh the baseline without recording.
//!
//! ```text
//! set(A)        set_with_no_record(B)   set(C)
//!   v=1 record    v=2 tagged, skipped     v=3 record diff(B, C)
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use recordable_delta::{ChangeLog, ChangelogFormat, SerializedCodec};
use recordable_store::{Store, Unsubscriber, Writable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, debug_span, trace};
use web_time::Instant;

use crate::config::{RecordableConfig, effective_limit};
use crate::event::{EventSubscription, Listeners, RecordEvent, RecordStatus};
use crate::storage::{HistoryStorage, RecordData};

/// Index before the first record.
pub const NO_RECORD_INDEX: i64 = -1;

/// Mutable history state. Never borrowed across a store write or a
/// listener call.
struct History {
    records: VecDeque<String>,
    index: i64,
    baseline: Option<Value>,
    limit: Option<usize>,
    recording: bool,
    /// True while the subscription's immediate first run is executing.
    attaching: bool,
    /// Store version when the current subscription attached.
    attached_version: u64,
    /// Runs delivered to the current subscription.
    delivered: u64,
    /// Store versions written by the engine itself.
    silent: BTreeSet<u64>,
}

impl History {
    fn snapshot(&self) -> Vec<String> {
        self.records.iter().cloned().collect()
    }

    /// Diff `incoming` against the baseline and append the record.
    fn record(&mut self, incoming: Value, codec: &SerializedCodec) -> Vec<RecordEvent> {
        let Some(baseline) = self.baseline.replace(incoming.clone()) else {
            trace!("baseline seeded");
            return Vec::new();
        };
        let Some(record) = codec.diff(&baseline, &incoming) else {
            trace!("write produced no delta");
            return Vec::new();
        };

        let mut events = Vec::new();
        if self.index == NO_RECORD_INDEX {
            self.index = 1;
        } else if self.index < self.records.len() as i64 {
            self.records.truncate(self.index.max(0) as usize);
            self.index += 1;
        } else {
            self.index += 1;
        }
        events.push(RecordEvent::IndexChanged {
            index: self.index,
            status: RecordStatus::New,
        });
        self.records.push_back(record);
        events.push(RecordEvent::RecordsChanged {
            records: self.snapshot(),
            status: RecordStatus::New,
        });

        if let Some(limit) = effective_limit(self.limit) {
            while self.records.len() > limit {
                self.records.pop_front();
                events.push(RecordEvent::RecordsChanged {
                    records: self.snapshot(),
                    status: RecordStatus::Calibrate,
                });
                self.index -= 1;
                events.push(RecordEvent::IndexChanged {
                    index: self.index,
                    status: RecordStatus::Calibrate,
                });
            }
        }
        events
    }
}

struct Shared {
    state: RefCell<History>,
    listeners: Rc<Listeners>,
    codec: SerializedCodec,
    storage: Option<Rc<dyn HistoryStorage>>,
    subscription: RefCell<Option<Unsubscriber>>,
    capturing: Cell<bool>,
}

/// Clears the capture flag even if a listener panics.
struct CaptureGuard<'a>(&'a Cell<bool>);

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Shared {
    fn capture(&self, incoming: Result<Value, serde_json::Error>) {
        let started = Instant::now();
        let (events, records, index) = {
            let mut state = self.state.borrow_mut();
            if state.attaching {
                state.baseline = incoming.ok();
                return;
            }
            state.delivered += 1;
            let version = state.attached_version + state.delivered;
            if state.silent.remove(&version) {
                state.baseline = incoming.ok();
                trace!(version, "engine write not recorded");
                return;
            }
            if self.capturing.get() {
                debug!(version, "nested capture skipped");
                return;
            }
            let incoming = match incoming {
                Ok(value) => value,
                Err(err) => {
                    debug!(version, error = %err, "value does not serialize; write not recorded");
                    return;
                }
            };
            let events = state.record(incoming, &self.codec);
            (events, state.records.len() as u64, state.index)
        };
        if events.is_empty() {
            return;
        }

        let span = debug_span!(
            "recordable.capture",
            records,
            index,
            duration_us = tracing::field::Empty
        );
        let _entered = span.enter();
        self.capturing.set(true);
        let _guard = CaptureGuard(&self.capturing);
        self.listeners.dispatch(&events);
        span.record("duration_us", started.elapsed().as_micros() as u64);
    }
}

/// Undo/redo history over a [`Writable`].
///
/// Cloning yields another handle to the same history.
pub struct Recordable<T> {
    store: Writable<T>,
    shared: Rc<Shared>,
}

impl<T> Clone for Recordable<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Recordable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Recordable")
            .field("records", &state.records.len())
            .field("index", &state.index)
            .field("recording", &state.recording)
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}

impl<T> Recordable<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    /// Wrap `store`; recording starts immediately unless `config.autostart`
    /// is off.
    #[must_use]
    pub fn new(store: Writable<T>, config: RecordableConfig) -> Self {
        Self::build(store, config, None)
    }

    /// Like [`new`](Self::new), with a backend for [`load`](Self::load) and
    /// [`save`](Self::save).
    #[must_use]
    pub fn with_storage(
        store: Writable<T>,
        config: RecordableConfig,
        storage: impl HistoryStorage + 'static,
    ) -> Self {
        Self::build(store, config, Some(Rc::new(storage)))
    }

    fn build(
        store: Writable<T>,
        config: RecordableConfig,
        storage: Option<Rc<dyn HistoryStorage>>,
    ) -> Self {
        let shared = Rc::new(Shared {
            state: RefCell::new(History {
                records: VecDeque::new(),
                index: NO_RECORD_INDEX,
                baseline: None,
                limit: config.limit,
                recording: false,
                attaching: false,
                attached_version: 0,
                delivered: 0,
                silent: BTreeSet::new(),
            }),
            listeners: Rc::new(Listeners::default()),
            codec: SerializedCodec::new(config.diff_options),
            storage,
            subscription: RefCell::new(None),
            capturing: Cell::new(false),
        });
        let recordable = Self { store, shared };
        if config.autostart {
            recordable.start_recording(config.limit);
        }
        recordable
    }

    // --- value access ------------------------------------------------------

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &Writable<T> {
        &self.store
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.store.get()
    }

    /// Write a value; recorded while recording.
    pub fn set(&self, value: T) {
        self.store.set(value);
    }

    /// Write `f(current)`; recorded while recording.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.store.update(f);
    }

    /// Write a value without recording it. The baseline moves to `value`,
    /// so the next recorded change is taken against it.
    pub fn set_with_no_record(&self, value: T) {
        let tagged = {
            let mut state = self.shared.state.borrow_mut();
            if state.recording {
                let version = self.store.version() + 1;
                state.silent.insert(version);
                true
            } else {
                false
            }
        };
        trace!(tagged, "write without record");
        self.store.set(value);
    }

    /// Write `f(current)` without recording it.
    pub fn update_with_no_record(&self, f: impl FnOnce(T) -> T) {
        let next = f(self.get());
        self.set_with_no_record(next);
    }

    /// Subscribe to the value.
    pub fn subscribe(&self, run: impl Fn(&T) + 'static) -> Unsubscriber {
        self.store.subscribe(run)
    }

    /// Listen for history events.
    pub fn on_event(&self, listener: impl Fn(&RecordEvent) + 'static) -> EventSubscription {
        self.shared.listeners.add(listener)
    }

    fn live_value(&self) -> Option<Value> {
        serde_json::to_value(self.get())
            .inspect_err(|err| debug!(error = %err, "live value does not serialize"))
            .ok()
            .filter(|value| !value.is_null())
    }

    fn write_back(&self, value: Value) -> bool {
        match self.rebuild(value) {
            Some(value) => {
                self.set_with_no_record(value);
                true
            }
            None => false,
        }
    }

    fn rebuild(&self, value: Value) -> Option<T> {
        serde_json::from_value::<T>(value)
            .inspect_err(|err| debug!(error = %err, "patched value does not deserialize"))
            .ok()
    }

    // --- navigation --------------------------------------------------------

    /// Recording and at least one record behind the index.
    #[must_use]
    pub fn is_can_undo(&self) -> bool {
        let state = self.shared.state.borrow();
        state.recording && state.index > 0
    }

    /// Recording and at least one record ahead of the index.
    #[must_use]
    pub fn is_can_redo(&self) -> bool {
        let state = self.shared.state.borrow();
        state.recording && !state.records.is_empty() && state.index < state.records.len() as i64
    }

    /// Revert the record behind the index.
    ///
    /// Returns false, changing nothing, when there is nothing to undo, the
    /// live value is absent, or the record does not apply to it.
    pub fn undo(&self) -> bool {
        if !self.is_can_undo() {
            return false;
        }
        let Some(current) = self.live_value() else {
            return false;
        };
        let (target, record) = {
            let state = self.shared.state.borrow();
            let target = state.index - 1;
            let Some(record) = usize::try_from(target)
                .ok()
                .and_then(|i| state.records.get(i))
            else {
                return false;
            };
            (target, record.clone())
        };
        let Some(previous) = self
            .shared
            .codec
            .unpatch(&current, &record)
            .and_then(|value| self.rebuild(value))
        else {
            return false;
        };

        self.shared.state.borrow_mut().index = target;
        self.shared.listeners.dispatch(&[RecordEvent::IndexChanged {
            index: target,
            status: RecordStatus::Undo,
        }]);
        self.set_with_no_record(previous);
        true
    }

    /// Revert an arbitrary serialized delta on the live value without
    /// touching the index or the records. Requires [`is_can_undo`](Self::is_can_undo).
    pub fn undo_with(&self, record: &str) -> bool {
        if !self.is_can_undo() {
            return false;
        }
        let Some(current) = self.live_value() else {
            return false;
        };
        match self.shared.codec.unpatch(&current, record) {
            Some(previous) => self.write_back(previous),
            None => false,
        }
    }

    /// Reapply the record at the index.
    ///
    /// Returns false, changing nothing, when there is nothing to redo, the
    /// live value is absent, or the record does not apply to it.
    pub fn redo(&self) -> bool {
        if !self.is_can_redo() {
            return false;
        }
        let Some(current) = self.live_value() else {
            return false;
        };
        let (target, record) = {
            let state = self.shared.state.borrow();
            let Some(record) = usize::try_from(state.index)
                .ok()
                .and_then(|i| state.records.get(i))
            else {
                return false;
            };
            (state.index + 1, record.clone())
        };
        let Some(next) = self
            .shared
            .codec
            .patch(&current, &record)
            .and_then(|value| self.rebuild(value))
        else {
            return false;
        };

        self.shared.state.borrow_mut().index = target;
        self.shared.listeners.dispatch(&[RecordEvent::IndexChanged {
            index: target,
            status: RecordStatus::Redo,
        }]);
        self.set_with_no_record(next);
        true
    }

    /// Apply an arbitrary serialized delta to the live value without
    /// touching the index or the records. Requires [`is_can_redo`](Self::is_can_redo).
    pub fn redo_with(&self, record: &str) -> bool {
        if !self.is_can_redo() {
            return false;
        }
        let Some(current) = self.live_value() else {
            return false;
        };
        match self.shared.codec.patch(&current, record) {
            Some(next) => self.write_back(next),
            None => false,
        }
    }

    // --- recording ---------------------------------------------------------

    /// Start (or restart) recording. The next delivered value becomes the
    /// baseline; records and index are kept.
    pub fn start_recording(&self, limit: Option<usize>) {
        self.stop_recording();
        {
            let mut state = self.shared.state.borrow_mut();
            state.limit = limit;
            state.recording = true;
            state.baseline = None;
            state.attaching = true;
            state.delivered = 0;
        }

        let weak = Rc::downgrade(&self.shared);
        let subscription = self.store.subscribe(move |value: &T| {
            if let Some(shared) = weak.upgrade() {
                shared.capture(serde_json::to_value(value));
            }
        });

        {
            let mut state = self.shared.state.borrow_mut();
            state.attaching = false;
            state.attached_version = self.store.version();
        }
        *self.shared.subscription.borrow_mut() = Some(subscription);
        debug!(?limit, "recording started");
    }

    /// Stop recording. Records and index are kept.
    pub fn stop_recording(&self) {
        let subscription = self.shared.subscription.borrow_mut().take();
        {
            let mut state = self.shared.state.borrow_mut();
            state.recording = false;
            state.silent.clear();
        }
        if let Some(subscription) = subscription {
            drop(subscription);
            debug!("recording stopped");
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.shared.state.borrow().recording
    }

    // --- persistence -------------------------------------------------------

    /// Replace records, index and value.
    ///
    /// With `None`, reads from the storage backend. Returns false when
    /// there is no backend, it fails, or it holds nothing.
    pub async fn load(&self, data: Option<RecordData<T>>) -> bool {
        let data = match data {
            Some(data) => data,
            None => {
                let Some(storage) = self.shared.storage.clone() else {
                    debug!("no history storage to load from");
                    return false;
                };
                let stored = match storage.load().await {
                    Ok(Some(stored)) => stored,
                    Ok(None) => {
                        debug!("history storage is empty");
                        return false;
                    }
                    Err(err) => {
                        debug!(error = %err, "history load failed");
                        return false;
                    }
                };
                match stored.into_typed::<T>() {
                    Ok(data) => data,
                    Err(err) => {
                        debug!(error = %err, "stored value does not deserialize");
                        return false;
                    }
                }
            }
        };

        {
            let mut state = self.shared.state.borrow_mut();
            state.records = data.records.into();
            state.index = data.current_record_index;
        }
        self.set_with_no_record(data.store_value);
        true
    }

    /// Assemble the persisted triple and hand it to the storage backend,
    /// if any. Backend failures are logged and otherwise ignored.
    pub async fn save(&self) -> RecordData<T> {
        let data = RecordData {
            records: self.get_records(),
            current_record_index: self.get_current_record_index(),
            store_value: self.get(),
        };
        if let Some(storage) = self.shared.storage.clone() {
            let saved = match data.to_json() {
                Ok(json) => storage.save(&json).await,
                Err(err) => Err(err),
            };
            if let Err(err) = saved {
                debug!(error = %err, "history save failed");
            }
        }
        data
    }

    // --- inspection --------------------------------------------------------

    #[must_use]
    pub fn get_records(&self) -> Vec<String> {
        self.shared.state.borrow().snapshot()
    }

    #[must_use]
    pub fn get_record(&self, index: usize) -> Option<String> {
        self.shared.state.borrow().records.get(index).cloned()
    }

    #[must_use]
    pub fn get_current_record_index(&self) -> i64 {
        self.shared.state.borrow().index
    }

    /// Drop every record and reset the index.
    pub fn clear_records(&self) {
        let event = {
            let mut state = self.shared.state.borrow_mut();
            state.records.clear();
            state.index = NO_RECORD_INDEX;
            RecordEvent::RecordsCleared {
                records: Vec::new(),
                index: state.index,
            }
        };
        self.shared.listeners.dispatch(&[event]);
    }

    fn reference_value(&self, reference: Option<&T>) -> Option<Value> {
        match reference {
            Some(value) => serde_json::to_value(value)
                .inspect_err(|err| debug!(error = %err, "reference value does not serialize"))
                .ok(),
            None => self.live_value(),
        }
    }

    /// Change list of a serialized delta against `reference`, or the live
    /// value when `None`.
    #[must_use]
    pub fn changelogs(&self, record: &str, reference: Option<&T>) -> Option<Vec<ChangeLog>> {
        let original = self.reference_value(reference)?;
        self.shared.codec.changelogs(record, &original)
    }

    /// Rendered serialized delta against `reference`, or the live value
    /// when `None`.
    #[must_use]
    pub fn changelogs_formatted(
        &self,
        record: &str,
        format: ChangelogFormat,
        reference: Option<&T>,
    ) -> Option<String> {
        let original = self.reference_value(reference)?;
        self.shared
            .codec
            .changelogs_formatted(record, &original, format)
    }

    /// The codec used for records.
    #[must_use]
    pub fn codec(&self) -> &SerializedCodec {
        &self.shared.codec
    }
}
