#![allow(unused)]
extern crate objcore;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use objcore::prelude::*;
use std::{hint::black_box, sync::Arc};

fn imp(value: usize) -> Imp {
    Imp::new(value).unwrap()
}

/// Registry with a root class and a five-level deep subclass chain. Methods live on the root
/// so that a slow lookup from the leaf walks the whole chain.
fn setup(methods: usize) -> (ClassRegistry, ClassId, Vec<Selector>) {
    let registry = ClassRegistry::new(RuntimeConfig::production()).unwrap();
    let types = Symbol::intern("v16@0:8");

    let selectors: Vec<Selector> = (0..methods)
        .map(|i| Selector::intern(&format!("bench_{i}")))
        .collect();
    let records: Vec<MethodRecord> = selectors
        .iter()
        .enumerate()
        .map(|(i, sel)| MethodRecord::new(*sel, types, imp(0x10_000 + i)))
        .collect();

    let root = registry
        .add_class(
            ClassRo::new("BenchRoot").with_methods(Arc::new(MethodList::new(&records))),
            None,
        )
        .unwrap();
    registry.realize(root).unwrap();

    let mut leaf = root;
    for depth in 0..5 {
        leaf = registry
            .add_class(ClassRo::new(&format!("BenchLevel{depth}")), Some(leaf))
            .unwrap();
        registry.realize(leaf).unwrap();
    }

    (registry, leaf, selectors)
}

/// Benchmark the lock-free inline cache hit path
///
/// All selectors are resolved once up front, so every lookup in the timed loop is served by
/// the cache of the leaf class.
fn bench_cache_hit(c: &mut Criterion) {
    let (registry, leaf, selectors) = setup(64);
    for sel in &selectors {
        registry.resolve(leaf, *sel).unwrap();
    }

    let mut group = c.benchmark_group("method_cache");
    group.throughput(Throughput::Elements(selectors.len() as u64));
    group.bench_function("cache_hit", |b| {
        b.iter(|| {
            for sel in &selectors {
                black_box(registry.cache_lookup(leaf, black_box(*sel)).unwrap());
            }
        });
    });
    group.finish();
}

/// Benchmark the slow path: walk the superclass chain and fill the cache
fn bench_resolve(c: &mut Criterion) {
    let (registry, leaf, selectors) = setup(64);

    let mut group = c.benchmark_group("method_resolve");
    group.throughput(Throughput::Elements(selectors.len() as u64));
    group.bench_function("resolve_after_flush", |b| {
        b.iter(|| {
            registry.flush_cache(leaf).unwrap();
            for sel in &selectors {
                black_box(registry.resolve(leaf, black_box(*sel)).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_cache_hit, bench_resolve);
criterion_main!(benches);
