#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use recordable::prelude::*;
use recordable::{
    ChangeOp, Error, JsonFileStorage, MemoryStorage, RecordData, SerializedCodec, decode_record,
    load_history, readable_with,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cart {
    items: Vec<String>,
    coupon: Option<String>,
}

fn cart() -> Cart {
    Cart {
        items: vec!["apple".into()],
        coupon: None,
    }
}

#[test]
fn derived_store_follows_history() {
    let history = recordable(cart(), RecordableConfig::default());
    let count = derived(vec![history.store().clone()], |carts: &[Cart]| {
        carts[0].items.len()
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let _sub = count.subscribe(move |n| seen_clone.borrow_mut().push(*n));

    history.update(|mut c| {
        c.items.push("pear".into());
        c
    });
    assert!(history.undo());

    assert_eq!(*seen.borrow(), vec![1, 2, 1]);
}

#[test]
fn helpers_build_stores() {
    let w = writable(3);
    w.set(4);
    assert_eq!(w.get(), 4);

    let r = readable("fixed");
    assert_eq!(r.get(), "fixed");

    let ticking = readable_with(0, |set| {
        set.set(42);
        None
    });
    assert_eq!(ticking.get(), 42);
}

#[test]
fn batched_writes_record_separately() {
    let history = recordable(cart(), RecordableConfig::default());
    {
        let _batch = BatchScope::new();
        history.update(|mut c| {
            c.items.push("pear".into());
            c
        });
        history.update(|mut c| {
            c.coupon = Some("SPRING".into());
            c
        });
    }
    assert_eq!(history.get_records().len(), 2);
    assert!(history.undo());
    assert_eq!(history.get().coupon, None);
    assert_eq!(history.get().items.len(), 2);
}

#[test]
fn lower_level_errors_convert() {
    fn decode(encoded: &str) -> recordable::Result<recordable::Delta> {
        Ok(recordable::delta::decode_delta(encoded)?)
    }
    fn apply(value: &serde_json::Value, delta: &recordable::Delta) -> recordable::Result<serde_json::Value> {
        Ok(recordable::delta::patch(value, delta)?)
    }

    assert!(matches!(decode("%%%"), Err(Error::Codec(_))));

    let delta = recordable::DiffPatcher::default()
        .diff(&json!({"a": 1}), &json!({"a": 2}))
        .unwrap();
    let err = apply(&json!({"a": 5}), &delta).unwrap_err();
    assert!(matches!(err, Error::Patch(_)));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn decode_record_reads_history_entries() {
    let history = recordable(cart(), RecordableConfig::default());
    history.update(|mut c| {
        c.coupon = Some("SPRING".into());
        c
    });
    let record = history.get_record(0).unwrap();

    let delta = decode_record(&record).unwrap();
    let patched = recordable::delta::patch(&serde_json::to_value(cart()).unwrap(), &delta).unwrap();
    assert_eq!(patched["coupon"], json!("SPRING"));

    assert!(matches!(decode_record("%%%"), Err(Error::Codec(_))));
}

#[test]
fn load_history_reads_typed_state() {
    let empty = MemoryStorage::new();
    let none: Option<RecordData<Cart>> = pollster::block_on(load_history(&empty)).unwrap();
    assert!(none.is_none());

    let stored = MemoryStorage::with_data(RecordData {
        records: Vec::new(),
        current_record_index: -1,
        store_value: serde_json::to_value(cart()).unwrap(),
    });
    let data: Option<RecordData<Cart>> = pollster::block_on(load_history(&stored)).unwrap();
    assert_eq!(data.unwrap().store_value, cart());

    let mismatched = MemoryStorage::with_data(RecordData {
        records: Vec::new(),
        current_record_index: -1,
        store_value: json!("not a cart"),
    });
    let err = pollster::block_on(load_history::<Cart>(&mismatched)).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}

#[test]
fn changelog_inspection() {
    let codec = SerializedCodec::default();
    let before = json!({"items": ["apple"], "coupon": null});
    let after = json!({"items": ["apple", "pear"], "coupon": "SPRING"});
    let record = codec.diff(&before, &after).unwrap();

    let logs = codec.changelogs(&record, &before).unwrap();
    assert!(logs.iter().any(|l| l.op == ChangeOp::Add && l.path == "/items/1"));
    assert!(logs.iter().any(|l| l.op == ChangeOp::Replace && l.path == "/coupon"));

    let html = codec
        .changelogs_formatted(&record, &before, ChangelogFormat::Html)
        .unwrap();
    assert!(html.contains("pear"));
}

#[test]
fn history_persists_to_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cart.json");

    let history = Recordable::with_storage(
        writable(cart()),
        RecordableConfig::default(),
        JsonFileStorage::new(&path),
    );
    history.update(|mut c| {
        c.coupon = Some("SPRING".into());
        c
    });
    let saved = pollster::block_on(history.save());
    assert_eq!(saved.current_record_index, 1);

    let restored = Recordable::with_storage(
        writable(cart()),
        RecordableConfig::default(),
        JsonFileStorage::new(&path),
    );
    assert!(pollster::block_on(restored.load(None)));
    assert_eq!(restored.get().coupon.as_deref(), Some("SPRING"));
    assert!(restored.undo());
    assert_eq!(restored.get(), cart());
}
