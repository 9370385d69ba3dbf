#![forbid(unsafe_code)]

//! End-to-end history scenarios: recording, navigation, events,
//! persistence and tracing.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recordable_delta::{ChangeOp, Delta, encode_delta};
use recordable_history::{
    HistoryStorage, JsonFileStorage, MemoryStorage, RecordData, RecordEvent, RecordStatus,
    Recordable, RecordableConfig, StorageError,
};
use recordable_store::{BatchScope, Store, Writable, map};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: i32,
}

fn counter(count: i32) -> Counter {
    Counter { count }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Todo {
    id: u32,
    title: String,
    done: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Board {
    todos: Vec<Todo>,
}

fn todo(id: u32, title: &str) -> Todo {
    Todo {
        id,
        title: title.to_string(),
        done: false,
    }
}

fn event_log<T>(history: &Recordable<T>) -> (Rc<RefCell<Vec<RecordEvent>>>, recordable_history::EventSubscription)
where
    T: Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = Rc::clone(&log);
    let sub = history.on_event(move |event| log_clone.borrow_mut().push(event.clone()));
    (log, sub)
}

// ============================================================================
// Recording and navigation
// ============================================================================

#[test]
fn new_record_emits_index_then_records() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    let (log, _sub) = event_log(&history);

    history.set(counter(1));

    let events = log.borrow();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        RecordEvent::IndexChanged {
            index: 1,
            status: RecordStatus::New
        }
    );
    assert!(matches!(
        &events[1],
        RecordEvent::RecordsChanged { records, status: RecordStatus::New } if records.len() == 1
    ));
}

#[test]
fn undo_redo_emit_index_events() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    history.set(counter(1));
    history.set(counter(2));
    let (log, _sub) = event_log(&history);

    assert!(history.undo());
    assert!(history.redo());

    assert_eq!(
        *log.borrow(),
        vec![
            RecordEvent::IndexChanged {
                index: 1,
                status: RecordStatus::Undo
            },
            RecordEvent::IndexChanged {
                index: 2,
                status: RecordStatus::Redo
            },
        ]
    );
}

#[test]
fn index_event_precedes_value_write() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    history.set(counter(1));
    history.set(counter(2));

    let order = Rc::new(RefCell::new(Vec::new()));
    let order_values = Rc::clone(&order);
    let _values = history.subscribe(move |c: &Counter| {
        order_values.borrow_mut().push(format!("value {}", c.count));
    });
    let order_events = Rc::clone(&order);
    let handle = history.clone();
    let _events = history.on_event(move |event| {
        if let RecordEvent::IndexChanged { index, status } = event {
            order_events.borrow_mut().push(format!(
                "index {index} {status:?} live={}",
                handle.get().count
            ));
        }
    });
    order.borrow_mut().clear();

    assert!(history.undo());
    assert!(history.redo());

    assert_eq!(
        *order.borrow(),
        vec![
            "index 1 Undo live=2",
            "value 1",
            "index 2 Redo live=1",
            "value 2",
        ]
    );
}

#[test]
fn write_after_undo_discards_redo_branch() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    for n in 1..=3 {
        history.set(counter(n));
    }
    assert!(history.undo());
    assert!(history.undo());
    assert_eq!(history.get(), counter(1));

    history.set(counter(10));

    assert_eq!(history.get_records().len(), 2);
    assert_eq!(history.get_current_record_index(), 2);
    assert!(!history.is_can_redo());
    assert!(history.undo());
    assert_eq!(history.get(), counter(1));
    assert!(history.undo());
    assert_eq!(history.get(), counter(0));
}

#[test]
fn limit_evicts_oldest_records() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::new(2));
    let (log, _sub) = event_log(&history);

    for n in 1..=4 {
        history.set(counter(n));
    }

    assert_eq!(history.get_records().len(), 2);
    assert_eq!(history.get_current_record_index(), 2);

    let events = log.borrow();
    let calibrations: Vec<_> = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                RecordEvent::IndexChanged {
                    status: RecordStatus::Calibrate,
                    ..
                } | RecordEvent::RecordsChanged {
                    status: RecordStatus::Calibrate,
                    ..
                }
            )
        })
        .collect();
    assert_eq!(calibrations.len(), 4);
    assert!(matches!(
        calibrations[0],
        RecordEvent::RecordsChanged { records, .. } if records.len() == 2
    ));
    assert_eq!(
        *calibrations[1],
        RecordEvent::IndexChanged {
            index: 2,
            status: RecordStatus::Calibrate
        }
    );
    drop(events);

    // Only the two newest changes can be undone.
    assert!(history.undo());
    assert!(history.undo());
    assert_eq!(history.get(), counter(2));
    assert!(!history.undo());
}

#[test]
fn zero_limit_keeps_everything() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::new(0));
    for n in 1..=20 {
        history.set(counter(n));
    }
    assert_eq!(history.get_records().len(), 20);
}

#[test]
fn clear_records_emits_cleared_event() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    history.set(counter(1));
    let (log, _sub) = event_log(&history);

    history.clear_records();

    assert_eq!(
        *log.borrow(),
        vec![RecordEvent::RecordsCleared {
            records: Vec::new(),
            index: -1
        }]
    );
}

#[test]
fn nested_values_undo_through_array_changes() {
    let initial = Board {
        todos: vec![todo(1, "write"), todo(2, "test")],
    };
    let history = Recordable::new(Writable::new(initial.clone()), RecordableConfig::default());

    history.update(|mut board| {
        board.todos[1].done = true;
        board
    });
    history.update(|mut board| {
        board.todos.insert(0, todo(3, "ship"));
        board
    });
    history.update(|mut board| {
        board.todos.swap(0, 2);
        board
    });
    let last = history.get();

    assert!(history.undo());
    assert!(history.undo());
    assert!(history.undo());
    assert_eq!(history.get(), initial);
    assert!(history.redo());
    assert!(history.redo());
    assert!(history.redo());
    assert_eq!(history.get(), last);
}

#[test]
fn changelogs_describe_a_record() {
    let history = Recordable::new(Writable::new(Board::default()), RecordableConfig::default());
    history.set(Board {
        todos: vec![todo(1, "write")],
    });
    let record = history.get_record(0).unwrap();

    let logs = history.changelogs(&record, Some(&Board::default())).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].op, ChangeOp::Add);
    assert_eq!(logs[0].path, "/todos/0");
}

// ============================================================================
// Engine writes
// ============================================================================

#[test]
fn silent_writes_inside_batch_are_not_recorded() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    {
        let _batch = BatchScope::new();
        history.set(counter(1));
        history.set_with_no_record(counter(2));
        history.set(counter(3));
        assert!(history.get_records().is_empty(), "delivery is deferred");
    }

    assert_eq!(history.get_records().len(), 2);
    assert!(history.undo());
    assert_eq!(history.get(), counter(2));
    // The first record expects 1, the live value is 2.
    assert!(!history.undo());
    assert_eq!(history.get_current_record_index(), 1);
}

#[test]
fn other_subscribers_see_engine_writes() {
    let store = Writable::new(counter(0));
    let history = Recordable::new(store.clone(), RecordableConfig::default());
    let doubled = map(store.clone(), |c: &Counter| c.count * 2);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let _sub = doubled.subscribe(move |v| seen_clone.borrow_mut().push(*v));

    history.set(counter(1));
    assert!(history.undo());
    assert!(history.redo());

    assert_eq!(*seen.borrow(), vec![0, 2, 0, 2]);
    assert_eq!(history.get_records().len(), 1);
}

#[test]
fn writes_from_event_listeners_are_recorded() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    let handle = history.clone();
    let _sub = history.on_event(move |event| {
        if let RecordEvent::IndexChanged {
            index: 1,
            status: RecordStatus::New,
        } = event
        {
            handle.set(counter(100));
        }
    });

    history.set(counter(1));

    assert_eq!(history.get(), counter(100));
    assert_eq!(history.get_records().len(), 2);
    assert_eq!(history.get_current_record_index(), 2);
}

#[test]
fn listeners_can_read_history_during_dispatch() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    let handle = history.clone();
    let observed = Rc::new(RefCell::new(Vec::new()));
    let observed_clone = Rc::clone(&observed);
    let _sub = history.on_event(move |_| {
        observed_clone
            .borrow_mut()
            .push((handle.get_current_record_index(), handle.get_records().len()));
    });

    history.set(counter(1));

    assert_eq!(*observed.borrow(), vec![(1, 1), (1, 1)]);
}

// ============================================================================
// Persistence
// ============================================================================

struct FailingStorage;

#[async_trait(?Send)]
impl HistoryStorage for FailingStorage {
    async fn load(&self) -> Result<Option<RecordData>, StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }

    async fn save(&self, _data: &RecordData) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }
}

#[test]
fn save_then_load_into_fresh_engine() {
    let storage = MemoryStorage::new();
    let first = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        storage.clone(),
    );
    first.set(counter(1));
    first.set(counter(2));
    assert!(first.undo());

    let saved = pollster::block_on(first.save());
    assert_eq!(saved.current_record_index, 1);
    assert_eq!(saved.store_value, counter(1));
    assert_eq!(storage.snapshot().unwrap().store_value, serde_json::json!({"count": 1}));

    let second = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        storage,
    );
    assert!(pollster::block_on(second.load(None)));
    assert_eq!(second.get(), counter(1));
    assert_eq!(second.get_records(), first.get_records());
    assert_eq!(second.get_current_record_index(), 1);

    assert!(second.redo());
    assert_eq!(second.get(), counter(2));
    assert!(second.undo());
    assert!(second.undo());
    assert_eq!(second.get(), counter(0));
}

#[test]
fn load_explicit_data_without_storage() {
    let source = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    source.set(counter(5));
    let data = pollster::block_on(source.save());

    let target = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    assert!(pollster::block_on(target.load(Some(data))));
    assert_eq!(target.get(), counter(5));
    assert_eq!(target.get_records().len(), 1);
    assert!(target.undo());
    assert_eq!(target.get(), counter(0));
}

#[test]
fn load_failures_return_false() {
    let bare = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());
    assert!(!pollster::block_on(bare.load(None)));

    let empty = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        MemoryStorage::new(),
    );
    assert!(!pollster::block_on(empty.load(None)));

    let failing = Recordable::with_storage(
        Writable::new(counter(3)),
        RecordableConfig::default(),
        FailingStorage,
    );
    assert!(!pollster::block_on(failing.load(None)));
    assert_eq!(failing.get(), counter(3));
    assert_eq!(failing.get_current_record_index(), -1);
}

#[test]
fn save_returns_data_even_when_storage_fails() {
    let history = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        FailingStorage,
    );
    history.set(counter(1));

    let data = pollster::block_on(history.save());
    assert_eq!(data.records.len(), 1);
    assert_eq!(data.current_record_index, 1);
    assert_eq!(data.store_value, counter(1));
}

#[test]
fn load_rejects_mismatched_value_type() {
    let storage = MemoryStorage::with_data(RecordData {
        records: Vec::new(),
        current_record_index: -1,
        store_value: serde_json::json!("not a counter"),
    });
    let history = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        storage,
    );
    assert!(!pollster::block_on(history.load(None)));
    assert_eq!(history.get(), counter(0));
}

#[test]
fn forged_record_fails_navigation_without_panicking() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        s: String,
    }

    let wire = serde_json::json!({"s": ["@@ -18446744073709551615,2 +1,2 @@\n-ab\n+cd\n", 0, 2]});
    let record = encode_delta(&Delta::from_value(&wire).unwrap()).unwrap();
    let history = Recordable::new(
        Writable::new(Note { s: String::new() }),
        RecordableConfig::default(),
    );
    let data = RecordData {
        records: vec![record.clone(), record],
        current_record_index: 1,
        store_value: Note { s: "ab".into() },
    };
    assert!(pollster::block_on(history.load(Some(data))));

    assert!(!history.redo());
    assert!(!history.undo());
    assert_eq!(history.get(), Note { s: "ab".into() });
    assert_eq!(history.get_current_record_index(), 1);
}

#[test]
fn json_file_storage_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let first = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        JsonFileStorage::new(&path),
    );
    first.set(counter(7));
    let _ = pollster::block_on(first.save());
    assert!(path.exists());

    let second = Recordable::with_storage(
        Writable::new(counter(0)),
        RecordableConfig::default(),
        JsonFileStorage::new(&path),
    );
    assert!(pollster::block_on(second.load(None)));
    assert_eq!(second.get(), counter(7));
    assert!(second.undo());
    assert_eq!(second.get(), counter(0));
}

// ============================================================================
// Tracing
// ============================================================================

#[derive(Clone, Default)]
struct TraceCapture {
    spans: Arc<Mutex<Vec<String>>>,
    record_counts: Arc<Mutex<Vec<u64>>>,
}

#[derive(Default)]
struct RecordsVisitor {
    records: Option<u64>,
}

impl tracing::field::Visit for RecordsVisitor {
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        if field.name() == "records" {
            self.records = Some(value);
        }
    }

    fn record_debug(&mut self, _field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {}
}

struct TraceSubscriber {
    next_id: AtomicU64,
    capture: TraceCapture,
}

impl tracing::Subscriber for TraceSubscriber {
    fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
        let name = attrs.metadata().name();
        if name == "recordable.capture" {
            let mut visitor = RecordsVisitor::default();
            attrs.record(&mut visitor);
            if let Some(records) = visitor.records {
                self.capture
                    .record_counts
                    .lock()
                    .expect("records capture lock")
                    .push(records);
            }
        }
        self.capture
            .spans
            .lock()
            .expect("span capture lock")
            .push(name.to_string());
        tracing::span::Id::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

    fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

    fn event(&self, _event: &tracing::Event<'_>) {}

    fn enter(&self, _span: &tracing::span::Id) {}

    fn exit(&self, _span: &tracing::span::Id) {}
}

fn capture_trace(run: impl FnOnce()) -> (Vec<String>, Vec<u64>) {
    let capture = TraceCapture::default();
    let subscriber = TraceSubscriber {
        next_id: AtomicU64::new(1),
        capture: capture.clone(),
    };
    let _guard = tracing::subscriber::set_default(subscriber);
    run();
    (
        capture.spans.lock().expect("span capture lock").clone(),
        capture
            .record_counts
            .lock()
            .expect("records capture lock")
            .clone(),
    )
}

#[test]
fn capture_span_nests_in_store_drain() {
    let history = Recordable::new(Writable::new(counter(0)), RecordableConfig::default());

    let (spans, record_counts) = capture_trace(|| {
        history.set(counter(1));
        history.set(counter(2));
        history.set_with_no_record(counter(3));
    });

    let drain = spans.iter().position(|s| s == "store.drain");
    let capture = spans.iter().position(|s| s == "recordable.capture");
    assert!(drain.is_some() && capture.is_some(), "spans: {spans:?}");
    assert!(drain < capture);
    assert_eq!(record_counts, vec![1, 2], "silent write opens no capture span");
}
