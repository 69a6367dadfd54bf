#![forbid(unsafe_code)]

use parking_lot::Mutex;
use pfc_cache::FileCache;
use pfc_store::MemoryStore;
use pfc_types::CacheConfig;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POOL: [&str; 10] = [
    "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9",
];

fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn fast_flush_config(max: usize) -> CacheConfig {
    CacheConfig::new(max, 0).with_dirty_time(Duration::from_millis(5))
}

/// Many threads pin overlapping groups under heavy eviction pressure. The
/// last write to every file must survive, and the table never exceeds its
/// capacity.
#[test]
fn stress_overlapping_groups_keep_last_writes() {
    const THREADS: u64 = 8;
    const ROUNDS: u32 = 150;

    let mem = MemoryStore::new();
    let cache = Arc::new(FileCache::new(mem.clone(), fast_flush_config(4)).expect("cache"));
    let last_written: Arc<Mutex<HashMap<&'static str, u32>>> = Arc::default();
    let done = Arc::new(AtomicBool::new(false));

    let monitor = {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut max_seen = 0;
            while !done.load(Ordering::SeqCst) {
                let m = cache.metrics();
                assert!(m.resident <= m.capacity, "{m:?}");
                assert!(m.pinned <= m.resident, "{m:?}");
                max_seen = max_seen.max(m.resident);
                std::thread::sleep(Duration::from_micros(200));
            }
            max_seen
        })
    };

    let workers: Vec<_> = (0..THREADS)
        .map(|tid| {
            let cache = Arc::clone(&cache);
            let last_written = Arc::clone(&last_written);
            std::thread::spawn(move || {
                let mut rng = 0x9E37_79B9_7F4A_7C15_u64 ^ (tid + 1);
                for round in 0..ROUNDS {
                    let width = (xorshift(&mut rng) % 3 + 1) as usize;
                    let mut group: Vec<&'static str> = (0..width)
                        .map(|_| POOL[(xorshift(&mut rng) % POOL.len() as u64) as usize])
                        .collect();
                    group.sort_unstable();
                    group.dedup();

                    cache.pin_files(&group).expect("pin");
                    for name in &group {
                        let stamp = ((tid as u32) << 16) | round;
                        let mut page = cache.mutable_file_data(name).expect("pinned view");
                        page[0..4].copy_from_slice(&stamp.to_le_bytes());
                        last_written.lock().insert(*name, stamp);
                    }
                    cache.unpin_files(&group);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker join");
    }
    done.store(true, Ordering::SeqCst);
    let max_seen = monitor.join().expect("monitor join");
    assert!(max_seen <= 4);

    let cache = Arc::into_inner(cache).expect("sole owner");
    let metrics = cache.metrics();
    assert_eq!(metrics.pinned, 0);
    assert!(metrics.evictions > 0, "pool larger than capacity must evict");
    cache.shutdown().expect("shutdown");

    for (name, stamp) in last_written.lock().iter() {
        let stored = mem.get(name).expect("backing file");
        assert_eq!(&stored[0..4], &stamp.to_le_bytes(), "lost write to {name}");
    }
}

/// Concurrent deletes racing pins never leave a resident entry for a name
/// whose backing file is gone once everything settles.
#[test]
fn stress_deletes_racing_pins_settle_consistently() {
    let mem = MemoryStore::new();
    let cache = Arc::new(FileCache::new(mem.clone(), fast_flush_config(3)).expect("cache"));

    let handles: Vec<_> = (0..4_u64)
        .map(|tid| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let mut rng = 0xD1B5_4A32_D192_ED03_u64 ^ (tid + 1);
                for _ in 0..200 {
                    let name = POOL[(xorshift(&mut rng) % 4) as usize];
                    if xorshift(&mut rng) % 3 == 0 {
                        cache.delete_file(name).expect("delete");
                    } else {
                        cache.pin_files(&[name]).expect("pin");
                        cache.mutable_file_data(name).expect("view")[7] = tid as u8;
                        cache.unpin_files(&[name]);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    let cache = Arc::into_inner(cache).expect("sole owner");
    cache.flush_all().expect("flush");
    for name in &POOL[0..4] {
        if cache.contains(name) {
            assert_eq!(cache.pin_count(name), 0);
            assert!(mem.contains(name), "resident {name} has no backing file");
        }
    }
    assert_eq!(cache.metrics().pinned, 0);
    cache.shutdown().expect("shutdown");
}

#[derive(Debug, Clone)]
enum Op {
    Write { names: Vec<usize>, byte: u8 },
    Read { names: Vec<usize> },
    Delete(usize),
    FlushAll,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let names = prop::collection::vec(0_usize..5, 1..=3);
    prop_oneof![
        4 => (names.clone(), any::<u8>()).prop_map(|(names, byte)| Op::Write { names, byte }),
        2 => names.prop_map(|names| Op::Read { names }),
        1 => (0_usize..5).prop_map(Op::Delete),
        1 => Just(Op::FlushAll),
    ]
}

/// A lone thread would block forever on a full cache of dirty entries.
fn make_room(cache: &FileCache<MemoryStore>, names: &[usize]) {
    let mut distinct = names.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if cache.len() + distinct.len() > cache.capacity() {
        cache.flush_all().expect("flush");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Single-threaded random operations agree with a plain map model, both
    /// through the cache and in the backing store after shutdown.
    #[test]
    fn random_ops_match_model(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let mem = MemoryStore::new();
        // The flusher stays idle; writeback happens through flush_all and
        // shutdown, so every step is deterministic.
        let cache = FileCache::new(mem.clone(), CacheConfig::new(3, 3600)).expect("cache");
        let mut model: HashMap<usize, u8> = HashMap::new();

        for op in &ops {
            match op {
                Op::Write { names, byte } => {
                    let group: Vec<&str> = names.iter().map(|idx| POOL[*idx]).collect();
                    make_room(&cache, names);
                    cache.pin_files(&group).expect("pin");
                    for idx in names {
                        cache.mutable_file_data(POOL[*idx]).expect("view")[0] = *byte;
                        model.insert(*idx, *byte);
                    }
                    cache.unpin_files(&group);
                }
                Op::Read { names } => {
                    let group: Vec<&str> = names.iter().map(|idx| POOL[*idx]).collect();
                    make_room(&cache, names);
                    cache.pin_files(&group).expect("pin");
                    for idx in names {
                        let expected = model.entry(*idx).or_insert(0);
                        prop_assert_eq!(cache.file_data(POOL[*idx]).expect("view")[0], *expected);
                    }
                    cache.unpin_files(&group);
                }
                Op::Delete(idx) => {
                    cache.delete_file(POOL[*idx]).expect("delete");
                    model.remove(idx);
                    prop_assert!(!cache.contains(POOL[*idx]));
                }
                Op::FlushAll => {
                    cache.flush_all().expect("flush");
                    prop_assert_eq!(cache.dirty_count(), 0);
                }
            }
            let m = cache.metrics();
            prop_assert!(m.resident <= 3);
            prop_assert_eq!(m.pinned, 0);
        }

        cache.shutdown().expect("shutdown");
        for idx in 0..5 {
            match model.get(&idx) {
                Some(byte) => {
                    let stored = mem.get(POOL[idx]).expect("backing file");
                    prop_assert_eq!(stored[0], *byte);
                }
                None => prop_assert!(!mem.contains(POOL[idx])),
            }
        }
    }
}
