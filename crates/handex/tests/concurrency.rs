//! Concurrent workloads: racing adds of the same values must agree on one
//! handle per value, across rows, growth, and the reader/writer locks.

use std::sync::Arc;
use std::thread;

use handex::{WideHandle, WideStore};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

#[test]
fn racing_adds_agree_on_handles() {
    const THREADS: usize = 8;
    const VALUES: usize = 10_000;

    let store = Arc::new(WideStore::with_bit_width(8));
    let values: Arc<Vec<String>> = Arc::new((0..VALUES).map(|i| format!("race-{i}")).collect());

    let mut workers = Vec::new();
    for seed in 0..THREADS as u64 {
        let store = Arc::clone(&store);
        let values = Arc::clone(&values);
        workers.push(thread::spawn(move || {
            let mut order: Vec<usize> = (0..VALUES).collect();
            order.shuffle(&mut StdRng::seed_from_u64(seed));
            let mut handles = vec![WideHandle::NULL; VALUES];
            for i in order {
                handles[i] = store.add(values[i].as_bytes()).unwrap();
            }
            handles
        }));
    }

    let per_thread: Vec<Vec<WideHandle>> = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();

    assert_eq!(store.count(), VALUES as u64);

    // All eight threads got the same handle for each value, and it resolves.
    let reference = &per_thread[0];
    for handles in &per_thread[1..] {
        assert_eq!(handles, reference);
    }
    for (i, handle) in reference.iter().enumerate() {
        assert!(!handle.is_null());
        assert_eq!(
            store.get(*handle).unwrap().unwrap().as_ref(),
            values[i].as_bytes()
        );
    }
}

#[test]
fn concurrent_adds_of_one_value_intern_once() {
    const THREADS: usize = 16;
    const REPEATS: usize = 500;

    let store = Arc::new(WideStore::new());
    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let store = Arc::clone(&store);
        workers.push(thread::spawn(move || {
            let mut seen = Vec::with_capacity(REPEATS);
            for _ in 0..REPEATS {
                seen.push(store.add(b"the-one-value").unwrap());
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.join().unwrap());
    }

    let first = all[0];
    assert!(all.iter().all(|&h| h == first));
    assert_eq!(store.count(), 1);

    // The row gained exactly one slot for the value (plus the sentinel when
    // the value happens to land in row 0).
    let stats = store.row_stats(first.row()).unwrap();
    let expected_fill = if first.row() == 0 { 2 } else { 1 };
    assert_eq!(stats.fill, expected_fill);
}

#[test]
fn readers_run_against_writers() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const VALUES_PER_WRITER: usize = 2_000;

    let store = Arc::new(WideStore::with_bit_width(8));
    let mut workers = Vec::new();

    for w in 0..WRITERS {
        let store = Arc::clone(&store);
        workers.push(thread::spawn(move || {
            for i in 0..VALUES_PER_WRITER {
                let value = format!("w{w}-{i}");
                let handle = store.add(value.as_bytes()).unwrap();
                assert_eq!(
                    store.get(handle).unwrap().unwrap().as_ref(),
                    value.as_bytes()
                );
            }
        }));
    }
    for r in 0..READERS {
        let store = Arc::clone(&store);
        workers.push(thread::spawn(move || {
            // Probe a moving target: values some writer may or may not have
            // interned yet. A hit must round-trip; a miss must be null.
            for i in 0..VALUES_PER_WRITER {
                let value = format!("w{}-{i}", r % WRITERS);
                let handle = store.find(value.as_bytes()).unwrap();
                if !handle.is_null() {
                    assert_eq!(
                        store.get(handle).unwrap().unwrap().as_ref(),
                        value.as_bytes()
                    );
                }
            }
        }));
    }

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(store.count(), (WRITERS * VALUES_PER_WRITER) as u64);
}
