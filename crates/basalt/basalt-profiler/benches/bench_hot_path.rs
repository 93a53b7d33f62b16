//! Overhead of the instrumentation hot path: folding one event, a full
//! scope enter/drop, and one cache classification.

use basalt_profiler::{
    CacheClassifier, CacheLatencyProfile, CallSite, Profiler, StatEvent, StatTable, TierThresholds,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    let mut table = StatTable::new();
    let slot = table.register("bench.rs", "apply", 1);

    group.bench_function("cycles_total", |b| {
        b.iter(|| table.apply(StatEvent::CyclesTotal, black_box(slot), black_box(42)))
    });
    group.bench_function("cycles_min", |b| {
        b.iter(|| table.apply(StatEvent::CyclesMin, black_box(slot), black_box(42)))
    });
    group.bench_function("record_call_end", |b| {
        b.iter(|| table.record_call_end(black_box(slot), black_box(120), black_box(40)))
    });
    group.finish();
}

fn bench_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope");
    let profiler = Profiler::new();
    let slot = profiler.register("bench.rs", "scope", 1);
    let site = CallSite::new("bench.rs", "site", 2);

    group.bench_function("enter_drop", |b| {
        b.iter(|| drop(black_box(profiler.enter(slot))))
    });
    group.bench_function("enter_site_drop", |b| {
        b.iter(|| drop(black_box(profiler.enter_site(&site))))
    });
    group.bench_function("cache_scope_drop", |b| {
        b.iter(|| drop(black_box(profiler.cache_scope(slot))))
    });
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let profile = CacheLatencyProfile {
        l1_cycles: 4,
        l2_cycles: 14,
        l3_cycles: 40,
        dram_cycles: 200,
        calibrated: true,
    };

    let classifier = CacheClassifier::calibrated(TierThresholds::from_profile(&profile));
    let mut calibrated = StatTable::with_classifier(classifier);
    let slot = calibrated.register("bench.rs", "classify", 1);
    let mut sample = 0u64;
    group.bench_function("calibrated", |b| {
        b.iter(|| {
            sample = (sample + 7) % 256;
            calibrated.classify(slot, black_box(sample))
        })
    });

    let mut fixed = StatTable::new();
    let slot = fixed.register("bench.rs", "classify", 1);
    group.bench_function("static", |b| b.iter(|| fixed.classify(slot, black_box(60))));
    group.finish();
}

criterion_group!(benches, bench_apply, bench_scope, bench_classify);
criterion_main!(benches);
