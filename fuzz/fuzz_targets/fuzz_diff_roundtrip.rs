#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use recordable_delta::{DiffPatcher, apply_changelogs, changelogs, decode_delta, encode_delta};
use serde_json::{Map, Value};

/// Small JSON tree; keys come from a tiny alphabet so objects overlap.
#[derive(Debug, Arbitrary)]
enum Node {
    Null,
    Bool(bool),
    Int(i8),
    Text(String),
    List(Vec<Node>),
    Object(Vec<(u8, Node)>),
}

impl Node {
    fn into_value(self, depth: usize) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(n) => Value::from(n),
            Self::Text(s) => Value::String(s),
            Self::List(_) | Self::Object(_) if depth == 0 => Value::Null,
            Self::List(items) => Value::Array(
                items
                    .into_iter()
                    .take(8)
                    .map(|n| n.into_value(depth - 1))
                    .collect(),
            ),
            Self::Object(entries) => {
                let mut map = Map::new();
                for (key, node) in entries.into_iter().take(6) {
                    let key = char::from(b'a' + key % 4).to_string();
                    map.insert(key, node.into_value(depth - 1));
                }
                Value::Object(map)
            }
        }
    }
}

fuzz_target!(|pair: (Node, Node)| {
    let left = pair.0.into_value(4);
    let right = pair.1.into_value(4);
    let differ = DiffPatcher::default();

    let Some(delta) = differ.diff(&left, &right) else {
        assert_eq!(left, right, "no delta for different values");
        return;
    };

    let encoded = encode_delta(&delta).expect("delta encodes");
    let decoded = decode_delta(&encoded).expect("delta decodes");
    assert_eq!(decoded, delta);

    assert_eq!(differ.patch(&left, &delta).expect("patch applies"), right);
    assert_eq!(differ.unpatch(&right, &delta).expect("unpatch applies"), left);

    let changes = changelogs(&left, &delta).expect("changelog builds");
    assert_eq!(apply_changelogs(&left, &changes).expect("changelog applies"), right);
});
