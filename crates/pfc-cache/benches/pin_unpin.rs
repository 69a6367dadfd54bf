#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pfc_cache::FileCache;
use pfc_store::MemoryStore;
use pfc_types::CacheConfig;

const NAMES: [&str; 16] = [
    "n00", "n01", "n02", "n03", "n04", "n05", "n06", "n07", "n08", "n09", "n10", "n11", "n12",
    "n13", "n14", "n15",
];

fn make_cache(capacity: usize) -> FileCache<MemoryStore> {
    FileCache::new(MemoryStore::new(), CacheConfig::new(capacity, 3600)).expect("cache")
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_pin_hit(c: &mut Criterion) {
    let cache = make_cache(8);
    cache.pin_files(&["hot"]).expect("warmup");
    cache.unpin_files(&["hot"]);

    c.bench_function("pin_unpin_hit", |b| {
        b.iter(|| {
            cache.pin_files(black_box(&["hot"])).expect("pin");
            cache.unpin_files(black_box(&["hot"]));
        });
    });
}

fn bench_pin_miss(c: &mut Criterion) {
    // Capacity 1 over clean pages: every pin evicts and reloads.
    let cache = make_cache(1);

    let mut iter = 0_usize;
    c.bench_function("pin_unpin_miss", |b| {
        b.iter(|| {
            let name = [NAMES[iter % NAMES.len()]];
            cache.pin_files(&name).expect("pin");
            cache.unpin_files(&name);
            iter += 1;
        });
    });
}

fn bench_group_pin(c: &mut Criterion) {
    // 8-entry capacity with a 16-name working set, four names per call.
    let cache = make_cache(8);

    let mut iter = 0_usize;
    c.bench_function("pin_unpin_group_of_4", |b| {
        b.iter(|| {
            let base = (iter * 4) % NAMES.len();
            let group = &NAMES[base..base + 4];
            cache.pin_files(black_box(group)).expect("pin");
            cache.unpin_files(group);
            iter += 1;
        });
    });
}

fn bench_read_view(c: &mut Criterion) {
    let cache = make_cache(2);
    cache.pin_files(&["view"]).expect("pin");

    c.bench_function("file_data_sum", |b| {
        b.iter(|| {
            let page = cache.file_data(black_box("view")).expect("view");
            page.iter().map(|b| u64::from(*b)).sum::<u64>()
        });
    });
    cache.unpin_files(&["view"]);
}

criterion_group!(
    pin_benches,
    bench_pin_hit,
    bench_pin_miss,
    bench_group_pin,
    bench_read_view,
);
criterion_main!(pin_benches);
