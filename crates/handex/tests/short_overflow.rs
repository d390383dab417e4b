//! End-to-end scenarios for the short store: vertical growth with tiny row
//! thresholds, and the 4-way alternate-row overflow at the maximum bit
//! width.

use std::collections::HashMap;

use handex::{
    Fingerprint, Fingerprinter, HandexError, ShortHandle, ShortStore, XxPearson, limits,
};

/// Sends every value to one fixed primary row; signatures stay real so the
/// in-row scan is exercised.
struct SameRow {
    hash: u32,
}

impl Fingerprinter for SameRow {
    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        if bytes.is_empty() {
            return Fingerprint::NULL;
        }
        Fingerprint {
            hash: self.hash,
            signature: XxPearson.fingerprint(bytes).signature,
        }
    }
}

#[test]
fn handles_survive_repeated_doubling() {
    let store = ShortStore::new();
    let mut handles: HashMap<String, ShortHandle> = HashMap::new();

    for i in 0..2_000u32 {
        let value = format!("short-{i}");
        let handle = store.add(value.as_bytes()).unwrap();
        handles.insert(value, handle);
    }

    assert!(
        store.bit_width() > limits::short::BIT_WIDTH_DEFAULT,
        "tiny row thresholds must have forced doubling"
    );
    assert_eq!(store.count(), 2_000);
    for (value, handle) in &handles {
        assert_eq!(
            store.get(*handle).unwrap().unwrap().as_ref(),
            value.as_bytes(),
            "stale handle for {value}"
        );
        assert_eq!(store.find(value.as_bytes()).unwrap(), *handle);
    }
}

// Allocates the full 2^24-row directory, a few hundred MiB for the duration
// of the test.
#[test]
fn overflow_spills_into_alternate_rows() {
    const PRIMARY: u32 = 0x0012_3456;
    let store = ShortStore::with_fingerprinter(24, SameRow { hash: PRIMARY });
    assert_eq!(store.bit_width(), 24);

    let mask = 0x00FF_FFFF;
    let rotated = ((PRIMARY << 12) | (PRIMARY >> 12)) & mask;
    let expected_rows = [PRIMARY, !PRIMARY & mask, rotated, !rotated & mask];

    // The primary row takes the first 256 values.
    let mut handles = Vec::new();
    for i in 0..256u32 {
        let value = format!("spill-{i}");
        let handle = store.add(value.as_bytes()).unwrap();
        assert_eq!(handle.row(), PRIMARY, "value {i} belongs in the primary");
        handles.push((value, handle));
    }

    // The 257th insert overflows into the first alternate, and a find still
    // locates it there.
    let overflow = store.add(b"spill-256").unwrap();
    assert_eq!(overflow.row(), expected_rows[1]);
    assert_eq!(store.find(b"spill-256").unwrap(), overflow);
    assert_eq!(store.add(b"spill-256").unwrap(), overflow, "dedup crosses rows");
    handles.push(("spill-256".to_owned(), overflow));

    // Fill all four candidate rows to their 256-slot threshold.
    for i in 257..1024u32 {
        let value = format!("spill-{i}");
        let handle = store.add(value.as_bytes()).unwrap();
        assert!(
            expected_rows.contains(&handle.row()),
            "value {i} landed outside the candidate set"
        );
        handles.push((value, handle));
    }
    assert_eq!(store.count(), 1024);

    // The 1025th insert has nowhere to go.
    let err = store.add(b"spill-1024").unwrap_err();
    assert_eq!(err, HandexError::OutOfCapacity { bit_width: 24 });
    assert_eq!(store.count(), 1024, "a failed add leaves the store unchanged");

    // Every spilled value still round-trips.
    for (value, handle) in &handles {
        assert_eq!(
            store.get(*handle).unwrap().unwrap().as_ref(),
            value.as_bytes()
        );
        assert_eq!(store.find(value.as_bytes()).unwrap(), *handle);
    }
}

#[test]
fn primary_row_lookup_below_maximum_width() {
    // At bit width 10 a value sits only in its primary row.
    let store = ShortStore::new();
    let handle = store.add(b"primary-only").unwrap();
    assert_eq!(store.find(b"primary-only").unwrap(), handle);
    assert_eq!(store.get(handle).unwrap().unwrap().as_ref(), b"primary-only");
}
