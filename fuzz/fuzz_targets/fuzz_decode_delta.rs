#![no_main]

use libfuzzer_sys::fuzz_target;
use recordable_delta::{DiffPatcher, decode_delta, encode_delta};
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let Ok(encoded) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(delta) = decode_delta(encoded) else {
        return;
    };

    // Anything that decodes must encode again and decode to the same delta.
    let again = encode_delta(&delta).expect("decoded delta re-encodes");
    assert_eq!(decode_delta(&again).expect("re-encoded delta decodes"), delta);

    // Applying an arbitrary delta may fail but must not panic.
    let differ = DiffPatcher::default();
    for target in [json!(null), json!({}), json!([]), json!("text"), json!({"a": [1, 2]})] {
        let _ = differ.patch(&target, &delta);
        let _ = differ.unpatch(&target, &delta);
    }
    let _ = differ.reverse(&delta);
});
