//! Multi-threaded tests of the lock-free cache read path and the lock substrate.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use objcore::prelude::*;

fn imp(value: usize) -> Imp {
    Imp::new(value).unwrap()
}

/// A class implementing `count` selectors named `{prefix}{i}` with implementation `0x1000 + i`.
fn wide_class(registry: &ClassRegistry, name: &str, prefix: &str, count: usize) -> (ClassId, Vec<Selector>) {
    let types = Symbol::intern("v16@0:8");
    let selectors: Vec<Selector> = (0..count)
        .map(|i| Selector::intern(&format!("{prefix}{i}")))
        .collect();
    let records: Vec<MethodRecord> = selectors
        .iter()
        .enumerate()
        .map(|(i, sel)| MethodRecord::new(*sel, types, imp(0x1000 + i)))
        .collect();

    let class = registry
        .add_class(
            ClassRo::new(name).with_methods(Arc::new(MethodList::new(&records))),
            None,
        )
        .unwrap();
    registry.realize(class).unwrap();
    (class, selectors)
}

#[test]
fn readers_never_see_wrong_imp_while_cache_grows() {
    let registry = ClassRegistry::new(RuntimeConfig::debug()).unwrap();
    let (class, selectors) = wide_class(&registry, "ConcurrentGrow", "grow_", 512);
    let done = AtomicBool::new(false);
    let hits = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    for (i, sel) in selectors.iter().enumerate() {
                        if let Some(found) = registry.cache_lookup(class, *sel).unwrap() {
                            assert_eq!(found, imp(0x1000 + i));
                            hits.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        scope.spawn(|| {
            for round in 0..8 {
                for sel in &selectors {
                    registry.resolve(class, *sel).unwrap();
                }
                if round % 2 == 1 {
                    registry.flush_cache(class).unwrap();
                }
            }
            done.store(true, Ordering::Release);
        });
    });

    assert!(hits.load(Ordering::Relaxed) > 0);

    // Every cached entry is correct once the dust settles
    for (i, sel) in selectors.iter().enumerate() {
        assert_eq!(registry.lookup_imp(class, *sel).unwrap(), imp(0x1000 + i));
    }
    registry.collect_garbage();
    assert_eq!(registry.reclaimer().pending(), 0);
}

#[test]
fn collection_while_readers_look_up_and_writer_resets() {
    let config = RuntimeConfig {
        reclaim_threshold: 1,
        ..RuntimeConfig::debug()
    };
    let registry = ClassRegistry::new(config).unwrap();
    let (class, selectors) = wide_class(&registry, "ConcurrentCollect", "collect_", 128);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    for (i, sel) in selectors.iter().enumerate() {
                        if let Some(found) = registry.cache_lookup(class, *sel).unwrap() {
                            assert_eq!(found, imp(0x1000 + i));
                        }
                    }
                }
            });
        }

        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                registry.collect_garbage();
            }
        });

        scope.spawn(|| {
            for _ in 0..50 {
                for sel in &selectors {
                    registry.resolve(class, *sel).unwrap();
                }
                registry.flush_cache(class).unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    assert_eq!(registry.reclaimer().active_readers(), 0);
    registry.collect_garbage();
    assert_eq!(registry.reclaimer().pending(), 0);
    assert!(registry.reclaimer().freed() > 0);
}

#[test]
fn concurrent_resolvers_fill_one_cache() {
    let registry = ClassRegistry::new(RuntimeConfig::debug()).unwrap();
    let (class, selectors) = wide_class(&registry, "ConcurrentFill", "fill_", 200);

    thread::scope(|scope| {
        for offset in 0..4 {
            let registry = &registry;
            let selectors = &selectors;
            scope.spawn(move || {
                for (i, sel) in selectors.iter().enumerate().skip(offset) {
                    assert_eq!(registry.lookup_imp(class, *sel).unwrap(), imp(0x1000 + i));
                }
            });
        }
    });

    let cache = registry.class(class).unwrap().cache();
    let guard = registry.reclaimer().pin();
    let entries = cache.entries(&guard);
    assert_eq!(entries.len(), 200);
    assert!(cache.capacity(&guard) >= 256);
    for (sel, found) in entries {
        let index = selectors.iter().position(|s| *s == sel).unwrap();
        assert_eq!(found, imp(0x1000 + index));
    }
}

#[test]
fn categories_race_with_lookups() {
    let registry = ClassRegistry::new(RuntimeConfig::debug()).unwrap();
    let types = Symbol::intern("v16@0:8");
    let sel = Selector::intern("race_target");
    let base = MethodList::new(&[MethodRecord::new(sel, types, imp(0x10))]);
    let class = registry
        .add_class(ClassRo::new("ConcurrentRace").with_methods(Arc::new(base)), None)
        .unwrap();
    registry.realize(class).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..2_000 {
                let found = registry.lookup_imp(class, sel).unwrap().value();
                assert!(found == 0x10 || (0x100..0x100 + 64).contains(&found));
            }
        });

        scope.spawn(|| {
            for i in 0..64 {
                let list = MethodList::new(&[MethodRecord::new(sel, types, imp(0x100 + i))]);
                registry
                    .add_category(
                        Category::new("Racer", class).with_instance_methods(Arc::new(list)),
                    )
                    .unwrap();
            }
        });
    });

    // The newest category wins and no stale entry survived in the cache
    assert_eq!(registry.lookup_imp(class, sel).unwrap(), imp(0x100 + 63));
}

#[test]
fn lock_two_in_opposite_orders_does_not_deadlock() {
    let a = Arc::new(Mutex::new("left", 0u64));
    let b = Arc::new(Mutex::new("right", 0u64));

    thread::scope(|scope| {
        for flip in [false, true] {
            let (first, second) = if flip { (&b, &a) } else { (&a, &b) };
            scope.spawn(move || {
                for _ in 0..10_000 {
                    let mut pair = Mutex::lock_two(first, second);
                    *pair.first() += 1;
                    *pair.second() += 1;
                }
            });
        }
    });

    assert_eq!(*a.lock(), 20_000);
    assert_eq!(*b.lock(), 20_000);
}

#[test]
fn list_array_attach_order_and_count() {
    let types = Symbol::intern("v16@0:8");
    let list = |name: &str, n: usize| {
        let records: Vec<MethodRecord> = (0..n)
            .map(|i| MethodRecord::new(Selector::intern(&format!("{name}_{i}")), types, imp(i + 1)))
            .collect();
        Arc::new(MethodList::new(&records))
    };

    let l0 = list("l0", 3);
    let l1 = list("l1", 2);
    let l2 = list("l2", 4);

    let mut array = ListArray::from_base(Some(l0.clone()));
    array.attach_lists(vec![l1.clone()]);
    array.attach_lists(vec![l2.clone()]);

    let order: Vec<_> = array.lists().iter().map(Arc::as_ptr).collect();
    assert_eq!(order, vec![Arc::as_ptr(&l2), Arc::as_ptr(&l1), Arc::as_ptr(&l0)]);
    assert_eq!(array.count(), 9);
    assert_eq!(array.iter().count(), array.count());
    assert_eq!(array.category_lists(true).len(), 2);
}
