//! Recorder protocol and resolution through the cache

use crate::common::FakeHeap;
use bytecode_system::CallsiteId;
use core_types::{ErrorKind, ObjRef, Value, VmResult};
use dispatch::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn capture<'c>(id: &'c str, args: &'c [Value]) -> Capture<'c> {
    Capture {
        dispatcher: id,
        callsite: CallsiteId(0),
        args,
    }
}

fn register(registry: &DispatcherRegistry, id: &str, f: impl Fn(&mut Recorder<'_>) -> VmResult<()> + Send + Sync + 'static) {
    registry.register(Dispatcher::new(id, Arc::new(f))).unwrap();
}

#[test]
fn test_plus_resolves_once() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    register(&registry, "plus", move |rec| {
        counter.fetch_add(1, Ordering::SeqCst);
        let a = rec.track_arg(0)?;
        let b = rec.track_arg(1)?;
        rec.guard_literal(a)?;
        rec.guard_literal(b)?;
        let sum = rec.value(a).as_int().unwrap_or(0) + rec.value(b).as_int().unwrap_or(0);
        rec.result_constant(Value::Int(sum))
    });
    let cache = InlineCache::new(1, 8);
    let args = [Value::Int(2), Value::Int(3)];
    let mut temps = Temps::new();
    for _ in 0..2 {
        let got = cache
            .dispatch(0, &registry, &capture("plus", &args), &heap, &mut temps)
            .unwrap();
        assert_eq!(got.outcome, DispatchOutcome::Value(Value::Int(5)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.state(0), CacheState::Monomorphic);
}

#[test]
fn test_missing_result_is_protocol_error() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    register(&registry, "silent", |rec| {
        rec.track_arg(0)?;
        Ok(())
    });
    let err = registry
        .resolve(&capture("silent", &[Value::Int(1)]), &heap)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DispatchProtocol);
}

#[test]
fn test_two_results_is_protocol_error() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    register(&registry, "greedy", |rec| {
        rec.result_constant(Value::Int(1))?;
        rec.result_constant(Value::Int(2))
    });
    let err = registry
        .resolve(&capture("greedy", &[]), &heap)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DispatchProtocol);
}

#[test]
fn test_unknown_dispatcher_surfaces() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    let cache = InlineCache::new(1, 8);
    let err = cache
        .dispatch(0, &registry, &capture("missing", &[]), &heap, &mut Temps::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownDispatcher);
    assert_eq!(cache.state(0), CacheState::Unlinked);
}

#[test]
fn test_delegate_with_inserted_arg() {
    let mut heap = FakeHeap::new();
    let code = heap.instance(1, 7);
    let registry = DispatcherRegistry::with_boot(DispatchConfig::default()).unwrap();
    register(&registry, "call-it", move |rec| {
        rec.insert_arg(0, Value::Obj(code))?;
        rec.delegate(BOOT_CODE_CONSTANT)
    });
    let args = [Value::Int(9)];
    let program = registry.resolve(&capture("call-it", &args), &heap).unwrap();
    assert_eq!(program.dispatcher(), "call-it");
    let got = program
        .evaluate(CallsiteId(0), &args, &heap, &mut Temps::new())
        .unwrap();
    assert_eq!(
        got,
        DispatchOutcome::Invoke {
            code,
            args: vec![Value::Int(9)],
        }
    );
}

#[test]
fn test_delegation_depth_is_bounded() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    register(&registry, "loop", |rec| rec.delegate("loop"));
    let err = registry.resolve(&capture("loop", &[]), &heap).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DispatchProtocol);
}

#[test]
fn test_decont_then_type_guard() {
    let mut heap = FakeHeap::new();
    let inner = heap.instance(2, 5);
    let cont = heap.container(3, Value::Obj(inner));
    let other_inner = heap.instance(4, 6);
    let other = heap.container(5, Value::Obj(other_inner));
    let registry = DispatcherRegistry::default();
    register(&registry, "unwrap", |rec| {
        let arg = rec.track_arg(0)?;
        let value = rec.track_decont(arg)?;
        rec.guard_type(value)?;
        rec.result_value(value)
    });
    let args = [Value::Obj(cont)];
    let program = registry.resolve(&capture("unwrap", &args), &heap).unwrap();
    let mut temps = Temps::new();
    assert_eq!(
        program.evaluate(CallsiteId(0), &args, &heap, &mut temps).unwrap(),
        DispatchOutcome::Value(Value::Obj(inner))
    );
    assert!(program
        .run(CallsiteId(0), &[Value::Obj(other)], &heap, &mut temps)
        .is_none());
}

#[test]
fn test_not_literal_and_type_object_guards() {
    let mut heap = FakeHeap::new();
    let special = heap.type_object(1, 4);
    let plain = heap.type_object(2, 4);
    let instance = heap.instance(3, 4);
    let registry = DispatcherRegistry::default();
    register(&registry, "not-special", move |rec| {
        let arg = rec.track_arg(0)?;
        rec.guard_not_literal_obj(arg, special)?;
        rec.guard_concreteness(arg)?;
        rec.result_constant(Value::str("type object"))
    });
    let program = registry
        .resolve(&capture("not-special", &[Value::Obj(plain)]), &heap)
        .unwrap();
    let mut temps = Temps::new();
    assert!(program.run(CallsiteId(0), &[Value::Obj(plain)], &heap, &mut temps).is_some());
    assert!(program.run(CallsiteId(0), &[Value::Obj(special)], &heap, &mut temps).is_none());
    assert!(program.run(CallsiteId(0), &[Value::Obj(instance)], &heap, &mut temps).is_none());

    let err = registry
        .resolve(&capture("not-special", &[Value::Obj(special)]), &heap)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DispatchProtocol);
}

#[test]
fn test_drop_arg_out_of_range() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    register(&registry, "dropper", |rec| {
        rec.drop_arg(3)?;
        rec.result_constant(Value::Null)
    });
    let err = registry
        .resolve(&capture("dropper", &[Value::Int(1)]), &heap)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Bounds);
}

#[test]
fn test_resume_runs_uncached() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::default();
    let resumes = Arc::new(AtomicUsize::new(0));
    let counter = resumes.clone();
    let dispatch: DispatchCallback = Arc::new(|rec: &mut Recorder<'_>| rec.result_constant(Value::Int(0)));
    let resume: DispatchCallback = Arc::new(move |rec: &mut Recorder<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
        let v = rec.track_arg(0)?;
        rec.result_value(v)
    });
    registry
        .register(Dispatcher::new("resumable", dispatch).with_resume(resume))
        .unwrap();
    for n in 0..3 {
        let args = [Value::Int(n)];
        let got = registry.resume(&capture("resumable", &args), &heap).unwrap();
        assert_eq!(got, DispatchOutcome::Value(Value::Int(n)));
    }
    assert_eq!(resumes.load(Ordering::SeqCst), 3);

    register(&registry, "plain", |rec| rec.result_constant(Value::Null));
    let err = registry.resume(&capture("plain", &[]), &heap).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DispatchProtocol);
}

#[test]
fn test_callsite_mismatch_misses() {
    let heap = FakeHeap::new();
    let registry = DispatcherRegistry::with_boot(DispatchConfig::default()).unwrap();
    let cache = InlineCache::new(1, 8);
    let args = [Value::Int(1)];
    let mut temps = Temps::new();
    cache
        .dispatch(0, &registry, &capture(BOOT_VALUE, &args), &heap, &mut temps)
        .unwrap();
    let other = Capture {
        dispatcher: BOOT_VALUE,
        callsite: CallsiteId(1),
        args: &args,
    };
    let got = cache.dispatch(0, &registry, &other, &heap, &mut temps).unwrap();
    assert!(!got.hit);
    assert_eq!(cache.state(0), CacheState::Polymorphic(2));
}

#[test]
fn test_cache_roots_include_literal_objects() {
    let mut heap = FakeHeap::new();
    let code = heap.instance(8, 1);
    let registry = DispatcherRegistry::with_boot(DispatchConfig::default()).unwrap();
    let cache = InlineCache::new(1, 8);
    let args = [Value::Obj(code)];
    cache
        .dispatch(0, &registry, &capture(BOOT_CODE_CONSTANT, &args), &heap, &mut Temps::new())
        .unwrap();
    let mut roots = Vec::new();
    cache.visit_values(&mut |v| roots.extend(v.as_obj()));
    assert_eq!(roots, vec![ObjRef::from_index(8)]);
}
