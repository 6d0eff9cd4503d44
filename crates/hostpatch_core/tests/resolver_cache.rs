use hostpatch_core::resolve::probe::RejectReason;
use hostpatch_core::{
    CapabilityResolver, CapabilityShape, HostError, HostValue, ModuleRecord, ModuleRegistryView,
    ModuleTable, PlainObject, ProbeSpec, ResolveError, ResolverConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Module table that counts how often it is scanned.
#[derive(Default)]
struct CountingRegistry {
    table: ModuleTable,
    scans: AtomicUsize,
}

impl CountingRegistry {
    fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl ModuleRegistryView for CountingRegistry {
    fn records(&self) -> Vec<ModuleRecord> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.table.records()
    }
}

fn message_store(messages: Vec<&'static str>) -> HostValue {
    PlainObject::new()
        .with_method("getMessages", move |_| {
            Ok(HostValue::List(
                messages.iter().map(|text| HostValue::from(*text)).collect(),
            ))
        })
        .into_value()
}

fn throwing_store() -> HostValue {
    PlainObject::new()
        .with_method("getMessages", |_| Err(HostError::thrown("not a store")))
        .into_value()
}

#[test]
fn probe_picks_first_store_returning_messages() {
    let table = Arc::new(ModuleTable::new());
    table.define(1, message_store(vec![]));
    table.define(2, message_store(vec!["hi"]));
    table.define(3, throwing_store());

    let resolver = CapabilityResolver::new(table);
    let handle = resolver
        .resolve(
            &CapabilityShape::props(["getMessages"]),
            &ProbeSpec::non_empty("getMessages", vec![HostValue::from("chan-1")]),
        )
        .expect("store with messages should resolve");

    assert_eq!(handle.module_id(), 2);
    assert!(!handle.via_default());
    let messages = handle
        .call("getMessages", &[HostValue::from("chan-1")])
        .expect("call through handle");
    assert_eq!(messages, HostValue::List(vec![HostValue::from("hi")]));
}

#[test]
fn first_match_is_deterministic_across_fresh_resolvers() {
    let table = Arc::new(ModuleTable::new());
    table.define(5, message_store(vec!["a"]));
    table.define(6, message_store(vec!["b"]));
    let shape = CapabilityShape::props(["getMessages"]);
    let probe = ProbeSpec::non_empty("getMessages", vec![]);

    for _ in 0..3 {
        let resolver = CapabilityResolver::new(table.clone());
        let handle = resolver.resolve(&shape, &probe).expect("resolve");
        assert_eq!(handle.module_id(), 5);
    }
}

#[test]
fn cached_handle_is_reused_without_rescanning() {
    let registry = Arc::new(CountingRegistry::default());
    registry.table.define(1, message_store(vec!["first"]));
    let resolver = CapabilityResolver::new(registry.clone());
    let shape = CapabilityShape::props(["getMessages"]);
    let probe = ProbeSpec::non_empty("getMessages", vec![]);

    let first = resolver.resolve(&shape, &probe).expect("first resolve");
    assert_eq!(registry.scans(), 1);

    registry.table.define(0, message_store(vec!["earlier id"]));
    let second = resolver.resolve(&shape, &probe).expect("second resolve");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.module_id(), 1);
    assert_eq!(registry.scans(), 1);
    assert_eq!(resolver.cached_len(), 1);
}

#[test]
fn probe_does_not_participate_in_cache_key() {
    let table = Arc::new(ModuleTable::new());
    table.define(1, message_store(vec!["x"]));
    let resolver = CapabilityResolver::new(table);
    let shape = CapabilityShape::props(["getMessages"]);

    let first = resolver
        .resolve(&shape, &ProbeSpec::structural())
        .expect("structural resolve");
    let second = resolver
        .resolve(
            &shape,
            &ProbeSpec::call("getMessages", vec![]).accept_when(|_| false),
        )
        .expect("cache hit ignores probe");
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn failures_are_not_cached() {
    let registry = Arc::new(CountingRegistry::default());
    let resolver = CapabilityResolver::new(registry.clone());
    let shape = CapabilityShape::props(["getMessages"]);
    let probe = ProbeSpec::non_empty("getMessages", vec![]);

    let err = resolver.resolve(&shape, &probe).expect_err("nothing defined");
    assert!(matches!(err, ResolveError::ShapeNotFound { .. }));
    assert_eq!(resolver.cached_len(), 0);

    registry.table.define(4, message_store(vec!["late"]));
    let handle = resolver.resolve(&shape, &probe).expect("retry after load");
    assert_eq!(handle.module_id(), 4);
    assert_eq!(registry.scans(), 2);
}

#[test]
fn verification_failure_reports_every_rejection() {
    let table = Arc::new(ModuleTable::new());
    table.define(1, message_store(vec![]));
    table.define(2, throwing_store());
    table.define(3, PlainObject::new().with("getMessages", "not callable").into_value());

    let resolver = CapabilityResolver::new(table);
    let err = resolver
        .resolve(
            &CapabilityShape::props(["getMessages"]),
            &ProbeSpec::non_empty("getMessages", vec![]),
        )
        .expect_err("no candidate passes");

    match err {
        ResolveError::VerificationFailed {
            candidates,
            rejections,
            truncated,
            ..
        } => {
            assert_eq!(candidates, 3);
            assert!(!truncated);
            let ids: Vec<u32> = rejections.iter().map(|r| r.module_id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert!(matches!(
                rejections[2].reason,
                RejectReason::EntryNotCallable(_)
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn probe_bound_truncates_search() {
    let table = Arc::new(ModuleTable::new());
    for id in 1..=4 {
        table.define(id, message_store(vec![]));
    }
    table.define(5, message_store(vec!["too late"]));

    let resolver = CapabilityResolver::with_config(
        table,
        ResolverConfig {
            max_probe_candidates: 2,
        },
    );
    let err = resolver
        .resolve(
            &CapabilityShape::props(["getMessages"]),
            &ProbeSpec::non_empty("getMessages", vec![]),
        )
        .expect_err("bound reached before module 5");

    match err {
        ResolveError::VerificationFailed {
            candidates,
            rejections,
            truncated,
            ..
        } => {
            assert_eq!(candidates, 5);
            assert_eq!(rejections.len(), 2);
            assert!(truncated);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn clear_cache_forces_rescan() {
    let registry = Arc::new(CountingRegistry::default());
    registry.table.define(1, message_store(vec!["x"]));
    let resolver = CapabilityResolver::new(registry.clone());
    let shape = CapabilityShape::props(["getMessages"]);

    resolver
        .resolve(&shape, &ProbeSpec::structural())
        .expect("resolve");
    assert_eq!(resolver.clear_cache(), 1);
    assert!(resolver.cached(&shape).is_none());
    resolver
        .resolve(&shape, &ProbeSpec::structural())
        .expect("resolve again");
    assert_eq!(registry.scans(), 2);
}
