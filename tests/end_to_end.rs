//! End-to-end tests of the class lifecycle through the public API.
//!
//! These tests drive a [`ClassRegistry`] the way a loader and a message dispatcher would:
//! register classes, realize them, attach categories, resolve selectors and check that the
//! inline caches never serve an implementation that a later category has replaced.

use std::sync::Arc;

use objcore::prelude::*;

fn imp(value: usize) -> Imp {
    Imp::new(value).unwrap()
}

fn methods(entries: &[(&str, usize)]) -> Arc<MethodList> {
    let types = Symbol::intern("v16@0:8");
    let records: Vec<MethodRecord> = entries
        .iter()
        .map(|(name, value)| MethodRecord::new(Selector::intern(name), types, imp(*value)))
        .collect();
    Arc::new(MethodList::new(&records))
}

fn registry() -> ClassRegistry {
    ClassRegistry::new(RuntimeConfig::debug()).unwrap()
}

#[test]
fn category_replacement_invalidates_cache() {
    let registry = registry();
    let foo = Selector::intern("e2e_foo");

    let class = registry
        .add_class(ClassRo::new("E2EWidget").with_methods(methods(&[])), None)
        .unwrap();
    registry.realize(class).unwrap();

    registry
        .add_category(Category::new("First", class).with_instance_methods(methods(&[("e2e_foo", 0x1000)])))
        .unwrap();
    assert_eq!(registry.lookup_imp(class, foo).unwrap(), imp(0x1000));
    assert_eq!(registry.cache_lookup(class, foo).unwrap(), Some(imp(0x1000)));

    registry
        .add_category(Category::new("Second", class).with_instance_methods(methods(&[("e2e_foo", 0x2000)])))
        .unwrap();

    // The attachment reset the cache
    assert_eq!(registry.cache_lookup(class, foo).unwrap(), None);
    assert_eq!(registry.lookup_imp(class, foo).unwrap(), imp(0x2000));
    assert_eq!(registry.cache_lookup(class, foo).unwrap(), Some(imp(0x2000)));
}

#[test]
fn categories_before_realization_are_queued() {
    let registry = registry();
    let ping = Selector::intern("e2e_ping");

    let class = registry.add_class(ClassRo::new("E2EQueued"), None).unwrap();
    registry
        .add_category(Category::new("Early", class).with_instance_methods(methods(&[("e2e_ping", 0x10)])))
        .unwrap();
    registry
        .add_category(Category::new("Later", class).with_instance_methods(methods(&[("e2e_ping", 0x20)])))
        .unwrap();
    assert_eq!(registry.unattached_count(), 2);

    assert!(matches!(
        registry.lookup_imp(class, ping),
        Err(Error::NotRealized(_))
    ));

    registry.realize(class).unwrap();
    assert_eq!(registry.unattached_count(), 0);

    // Later categories shadow earlier ones
    assert_eq!(registry.lookup_imp(class, ping).unwrap(), imp(0x20));
}

#[test]
fn subclass_inherits_and_category_on_superclass_flushes_subclass() {
    let registry = registry();
    let draw = Selector::intern("e2e_draw");

    let base = registry
        .add_class(ClassRo::new("E2EShape").with_methods(methods(&[("e2e_draw", 0x100)])), None)
        .unwrap();
    let derived = registry.add_class(ClassRo::new("E2ECircle"), Some(base)).unwrap();
    registry.realize(base).unwrap();
    registry.realize(derived).unwrap();

    assert_eq!(registry.lookup_imp(derived, draw).unwrap(), imp(0x100));
    assert_eq!(registry.cache_lookup(derived, draw).unwrap(), Some(imp(0x100)));

    registry
        .add_category(Category::new("Fancy", base).with_instance_methods(methods(&[("e2e_draw", 0x200)])))
        .unwrap();

    assert_eq!(registry.cache_lookup(derived, draw).unwrap(), None);
    assert_eq!(registry.lookup_imp(derived, draw).unwrap(), imp(0x200));
}

#[test]
fn class_methods_land_on_metaclass() {
    let registry = registry();
    let make = Selector::intern("e2e_make");

    let class = registry.add_class(ClassRo::new("E2EFactory"), None).unwrap();
    let meta = registry
        .add_metaclass(class, ClassRo::new("E2EFactory"), Some(class))
        .unwrap();
    registry.realize(class).unwrap();
    assert!(registry.class(meta).unwrap().is_realized());

    registry
        .add_category(Category::new("Making", class).with_class_methods(methods(&[("e2e_make", 0x300)])))
        .unwrap();

    assert_eq!(registry.lookup_imp(meta, make).unwrap(), imp(0x300));
    assert!(matches!(
        registry.lookup_imp(class, make),
        Err(Error::MethodNotFound { .. })
    ));
}

#[test]
fn exchange_and_duplicate() {
    let registry = registry();
    let left = Selector::intern("e2e_left");
    let right = Selector::intern("e2e_right");

    let class = registry
        .add_class(
            ClassRo::new("E2ESwapper").with_methods(methods(&[("e2e_left", 0x1), ("e2e_right", 0x2)])),
            None,
        )
        .unwrap();
    registry.realize(class).unwrap();
    assert_eq!(registry.lookup_imp(class, left).unwrap(), imp(0x1));

    let copy = registry.duplicate_class(class, "E2ESwapperCopy").unwrap();

    registry
        .exchange_implementations(class, left, class, right)
        .unwrap();
    assert_eq!(registry.lookup_imp(class, left).unwrap(), imp(0x2));
    assert_eq!(registry.lookup_imp(class, right).unwrap(), imp(0x1));

    // The copy was taken before the exchange and stays independent
    assert_eq!(registry.lookup_imp(copy, left).unwrap(), imp(0x1));
    assert_eq!(registry.lookup_imp(copy, right).unwrap(), imp(0x2));
}

#[test]
fn initialize_runs_once() {
    let registry = registry();
    let class = registry.add_class(ClassRo::new("E2EInit"), None).unwrap();
    registry.realize(class).unwrap();

    let mut runs = 0;
    registry.initialize_class(class, || runs += 1).unwrap();
    registry.initialize_class(class, || runs += 1).unwrap();
    assert_eq!(runs, 1);
    assert!(registry.class(class).unwrap().is_initialized());
}

#[test]
fn flush_all_and_collect() {
    let registry = registry();
    let tick = Selector::intern("e2e_tick");

    let class = registry
        .add_class(ClassRo::new("E2EClock").with_methods(methods(&[("e2e_tick", 0x40)])), None)
        .unwrap();
    registry.realize(class).unwrap();
    registry.lookup_imp(class, tick).unwrap();

    assert!(registry.flush_all_caches() >= 1);
    assert_eq!(registry.cache_lookup(class, tick).unwrap(), None);

    // No reader is pinned, so every retired array can be freed
    registry.collect_garbage();
    assert_eq!(registry.reclaimer().pending(), 0);
}
