//! Concurrency stress tests.
//!
//! These are designed to shake out latch-protocol races: disjoint-block
//! inserts, mixed insert/delete churn, readers running against writers, and
//! split/coalesce storms around the root. Every test finishes with a full
//! verification pass and a structural audit once the threads have joined.
//!
//! Run release mode for meaningful contention:
//! ```bash
//! cargo test --test stress_tests --release
//! ```

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crabtree::BPlusTree;

fn hardware_threads() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get()).clamp(2, 16)
}

#[test]
fn concurrent_disjoint_block_inserts() {
    common::init_tracing();
    const TOTAL_KEYS: u64 = 1000;

    let threads = hardware_threads() as u64;
    let block = TOTAL_KEYS / threads;
    let tree = Arc::new(BPlusTree::<u64, u64>::new());

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let lo = t * block;
                let hi = if t + 1 == threads { TOTAL_KEYS } else { lo + block };
                for k in lo..hi {
                    assert!(tree.insert(k, k), "duplicate in disjoint block");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(tree.len() as u64, TOTAL_KEYS);
    for k in 0..TOTAL_KEYS {
        assert_eq!(tree.values(&k), vec![k], "key {k} lost");
    }
    let keys: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..TOTAL_KEYS).collect::<Vec<_>>());
    tree.check_structure();
}

#[test]
fn concurrent_interleaved_key_inserts() {
    common::init_tracing();
    const KEYS_PER_THREAD: u64 = 2000;

    let threads = hardware_threads() as u64;
    let tree = Arc::new(BPlusTree::<u64, u64>::new());

    // Thread t inserts keys congruent to t modulo the thread count, so
    // neighbors constantly collide on the same leaves.
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let k = i * threads + t;
                    assert!(tree.insert(k, k));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(tree.len() as u64, threads * KEYS_PER_THREAD);
    tree.check_structure();
    let total = tree.iter().count() as u64;
    assert_eq!(total, threads * KEYS_PER_THREAD);
}

#[test]
fn concurrent_duplicate_pair_racers_install_exactly_once() {
    common::init_tracing();
    const KEYS: u64 = 500;

    let threads = hardware_threads();
    let tree = Arc::new(BPlusTree::<u64, u64>::new());
    let wins = Arc::new(AtomicUsize::new(0));

    // Every thread tries to insert the same pairs; each pair must be
    // installed exactly once across all racers.
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let tree = Arc::clone(&tree);
            let wins = Arc::clone(&wins);
            thread::spawn(move || {
                for k in 0..KEYS {
                    if tree.insert(k, k) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::Relaxed) as u64, KEYS);
    assert_eq!(tree.len() as u64, KEYS);
    tree.check_structure();
}

#[test]
fn concurrent_insert_delete_churn_on_disjoint_ranges() {
    common::init_tracing();
    const KEYS_PER_THREAD: u64 = 1500;
    const RANGE_STRIDE: u64 = 1 << 20;

    let threads = hardware_threads() as u64;
    let tree = Arc::new(BPlusTree::<u64, u64>::new());

    // Each thread owns a private key range: insert everything, delete the
    // odd half, reinsert a quarter. Cross-thread interference is purely
    // structural (shared leaves and split/merge cascades at the seams).
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let base = t * RANGE_STRIDE;
                for i in 0..KEYS_PER_THREAD {
                    assert!(tree.insert(base + i, i));
                }
                for i in (1..KEYS_PER_THREAD).step_by(2) {
                    assert!(tree.delete(&(base + i), &i));
                }
                for i in (1..KEYS_PER_THREAD).step_by(4) {
                    assert!(tree.insert(base + i, i));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    tree.check_structure();
    for t in 0..threads {
        let base = t * RANGE_STRIDE;
        for i in 0..KEYS_PER_THREAD {
            let expected_present = i % 2 == 0 || i % 4 == 1;
            assert_eq!(
                tree.contains(&(base + i), &i),
                expected_present,
                "thread {t} key {i} in wrong state"
            );
        }
    }
}

#[test]
fn readers_run_against_writers() {
    common::init_tracing();
    const KEYS: u64 = 4000;

    let tree = Arc::new(BPlusTree::<u64, u64>::new());
    let writers_done = Arc::new(AtomicUsize::new(0));
    let writer_count = (hardware_threads() / 2).max(1);

    let mut handles = Vec::new();
    for w in 0..writer_count as u64 {
        let tree = Arc::clone(&tree);
        let writers_done = Arc::clone(&writers_done);
        handles.push(thread::spawn(move || {
            for i in 0..KEYS / writer_count as u64 {
                let k = i * writer_count as u64 + w;
                assert!(tree.insert(k, k));
            }
            writers_done.fetch_add(1, Ordering::Release);
        }));
    }
    for _ in 0..writer_count {
        let tree = Arc::clone(&tree);
        let writers_done = Arc::clone(&writers_done);
        handles.push(thread::spawn(move || {
            // Point reads must only ever observe fully installed pairs.
            while writers_done.load(Ordering::Acquire) < writer_count {
                for k in (0..KEYS).step_by(37) {
                    let values = tree.values(&k);
                    match values.as_slice() {
                        [] => {}
                        [v] => assert_eq!(*v, k, "torn value for key {k}"),
                        other => panic!("key {k} has unexpected values {other:?}"),
                    }
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    tree.check_structure();
    let covered = (KEYS / writer_count as u64) * writer_count as u64;
    for k in 0..covered {
        assert_eq!(tree.values(&k), vec![k]);
    }
}

#[test]
fn root_collapse_storm() {
    common::init_tracing();
    const ROUNDS: u64 = 60;

    let threads = hardware_threads() as u64;
    let tree = Arc::new(BPlusTree::<u64, u64>::new());

    // Repeatedly grow the tree past a root split and drain it back to
    // empty, with all threads hammering the same small key range so the
    // root pointer swaps constantly.
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    for k in 0..30u64 {
                        tree.insert(k, t);
                    }
                    for k in 0..30u64 {
                        tree.delete(&k, &t);
                    }
                    if round % 16 == 0 {
                        // Periodic scans keep the leaf chain honest.
                        let _ = tree.iter().count();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Every thread deleted exactly what it inserted.
    assert!(tree.is_empty(), "leftover pairs: {:?}", tree.iter().collect::<Vec<_>>());
    assert_eq!(tree.height(), 0);
    tree.check_structure();
}
