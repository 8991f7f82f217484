//! Inline caches raced across threads
//!
//! Many threads hit one cold dispatch site at once. Every thread must get
//! the right result whichever thread's program lands in the cache, and the
//! site must be warm afterwards. Resolvers run with no heap lock held, so
//! they may call back into the instance.

use core_types::{ObjRef, Value};
use dispatch::{CacheState, Dispatcher, Recorder, BOOT_VALUE};
use integration_tests::{add_body, boot_plain, caller};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

fn plus_dispatcher(code: ObjRef, resolved: Arc<AtomicUsize>) -> Dispatcher {
    Dispatcher::new(
        "plus",
        Arc::new(move |rec: &mut Recorder<'_>| {
            resolved.fetch_add(1, Ordering::SeqCst);
            let a = rec.track_arg(0)?;
            let b = rec.track_arg(1)?;
            rec.guard_type(a)?;
            rec.guard_type(b)?;
            rec.insert_arg(0, Value::Obj(code))?;
            let callee = rec.track_arg(0)?;
            rec.drop_arg(0)?;
            rec.result_code_invocation(callee)
        }),
    )
}

/// Test: A cold callsite raced by many threads resolves correctly
#[test]
fn test_cold_callsite_race() {
    let vm = boot_plain();
    let add = vm.add_routine(add_body()).unwrap();
    let resolved = Arc::new(AtomicUsize::new(0));
    vm.register_dispatcher(plus_dispatcher(vm.static_code(add).unwrap(), resolved.clone()))
        .unwrap();
    let id = caller(&vm, "plus");
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for t in 0..THREADS as i64 {
            let vm = &vm;
            let barrier = &barrier;
            s.spawn(move || {
                let mut tc = vm.attach().unwrap();
                barrier.wait();
                for i in 0..50 {
                    let got = tc.call_routine(id, &[Value::Int(t), Value::Int(i)]).unwrap();
                    assert_eq!(got, Value::Int(t + i));
                }
            });
        }
    });

    let after_race = resolved.load(Ordering::SeqCst);
    assert!(after_race >= 1);
    assert!(after_race <= THREADS);
    // Losers of the install race find an equivalent program and back off
    let routine = vm.routine(id).unwrap();
    assert_eq!(routine.caches().state(0), CacheState::Monomorphic);
    assert_eq!(routine.caches().programs(0).len(), 1);

    // The winning program serves everyone from now on
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(id, &[Value::Int(20), Value::Int(22)]).unwrap(), Value::Int(42));
    assert_eq!(resolved.load(Ordering::SeqCst), after_race);
}

/// Test: Value results stay per-call under contention
#[test]
fn test_boot_value_under_contention() {
    let vm = boot_plain();
    let id = caller(&vm, BOOT_VALUE);
    thread::scope(|s| {
        for t in 0..THREADS as i64 {
            let vm = &vm;
            s.spawn(move || {
                let mut tc = vm.attach().unwrap();
                for i in 0..100 {
                    let got = tc.call_routine(id, &[Value::Int(t * 1000 + i), Value::Int(0)]).unwrap();
                    assert_eq!(got, Value::Int(t * 1000 + i));
                }
            });
        }
    });
}

/// Test: A resolver can attach, allocate and read the heap mid-dispatch
#[test]
fn test_resolver_reenters_instance() {
    let vm = Arc::new(boot_plain());
    let add = vm.add_routine(add_body()).unwrap();
    let code = vm.static_code(add).unwrap();
    let int = vm.types().int.clone();
    let weak = Arc::downgrade(&vm);
    let reentered = Arc::new(AtomicUsize::new(0));
    let seen = reentered.clone();
    vm.register_dispatcher(Dispatcher::new(
        "plus-checked",
        Arc::new(move |rec: &mut Recorder<'_>| {
            if let Some(vm) = weak.upgrade() {
                let helper = vm.attach()?;
                let boxed = helper.with_heap(|heap, me| heap.box_value(me, &int, Value::Int(5)))?;
                if vm.with_heap(|heap| heap.unbox_int(boxed))? == 5 {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }
            let a = rec.track_arg(0)?;
            let b = rec.track_arg(1)?;
            rec.guard_type(a)?;
            rec.guard_type(b)?;
            rec.insert_arg(0, Value::Obj(code))?;
            let callee = rec.track_arg(0)?;
            rec.drop_arg(0)?;
            rec.result_code_invocation(callee)
        }),
    ))
    .unwrap();
    let id = caller(&vm, "plus-checked");

    thread::scope(|s| {
        for t in 0..THREADS as i64 {
            let vm = &vm;
            s.spawn(move || {
                let mut tc = vm.attach().unwrap();
                assert_eq!(tc.call_routine(id, &[Value::Int(t), Value::Int(1)]).unwrap(), Value::Int(t + 1));
            });
        }
    });

    let resolutions = reentered.load(Ordering::SeqCst);
    assert!((1..=THREADS).contains(&resolutions));
    assert_eq!(vm.routine(id).unwrap().caches().state(0), CacheState::Monomorphic);
    assert_eq!(vm.orchestrator().thread_count(), 0);
}
