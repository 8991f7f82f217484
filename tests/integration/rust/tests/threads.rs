//! Several threads of one instance and stop-the-world collection
//!
//! Verifies that collections coordinated by one thread stop the others at
//! safepoints or collect on behalf of blocked ones, and that live data of
//! every thread survives. Outside collections, heap work on one thread
//! never waits on another.

use bytecode_system::{FrameBody, Opcode, Reg};
use core_types::Value;
use integration_tests::{boot, boot_plain, chain_sum_body};
use interpreter::VmConfig;
use memory_manager::HeapConfig;
use specializer::SpeshConfig;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

/// spin(flag, array type) allocates garbage until the container `flag`
/// holds a true value, and returns the number of rounds it spun.
fn spin_body() -> FrameBody {
    let mut body = FrameBody::new("spin").with_params(2).with_registers(6);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Param { dest: Reg(1), index: 1 });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 0 });
    body.emit(Opcode::ConstI { dest: Reg(3), value: 1 });
    let top = body.emit(Opcode::Safepoint);
    body.emit(Opcode::Decont {
        dest: Reg(4),
        src: Reg(0),
    });
    let exit = body.emit(Opcode::IfI { cond: Reg(4), target: 0 });
    body.emit(Opcode::Create {
        dest: Reg(5),
        type_reg: Reg(1),
    });
    body.emit(Opcode::AddI {
        dest: Reg(2),
        a: Reg(2),
        b: Reg(3),
    });
    body.emit(Opcode::Goto { target: top });
    let done = body.emit(Opcode::Return { src: Reg(2) });
    body.patch_target(exit, done);
    body
}

/// Test: A running thread is interrupted and votes at a safepoint
#[test]
fn test_running_thread_is_interrupted() {
    let vm = boot_plain();
    let spin = vm.add_routine(spin_body()).unwrap();
    let array_type = Value::Obj(vm.type_object(&vm.types().array));
    let scalar = vm.types().scalar.clone();

    let mut tc = vm.attach().unwrap();
    let flag = tc
        .with_heap(|heap, me| heap.new_container(me, &scalar, Value::Int(0), true))
        .unwrap();
    tc.push_root(Value::Obj(flag));

    thread::scope(|s| {
        let vm = &vm;
        let spinner = s.spawn(move || {
            let mut worker = vm.attach().unwrap();
            let spins = worker.call_routine(spin, &[Value::Obj(flag), array_type]).unwrap();
            (worker.id(), spins)
        });

        let mut interrupted = Vec::new();
        for _ in 0..100_000 {
            if let Some(summary) = tc.collect_garbage(false) {
                if !summary.interrupted.is_empty() {
                    interrupted = summary.interrupted;
                    break;
                }
            }
            thread::yield_now();
        }
        tc.with_heap(|heap, me| heap.assign(me, flag, Value::Int(1))).unwrap();

        let (spinner_id, spins) = spinner.join().unwrap();
        assert_eq!(interrupted, vec![spinner_id]);
        assert!(spins.as_int().unwrap() >= 0);
    });
    assert_eq!(vm.orchestrator().thread_count(), 1);
}

/// Test: Idle threads are collected for without being woken
#[test]
fn test_idle_threads_are_stolen() {
    let vm = boot_plain();
    let mut tc = vm.attach().unwrap();
    let idle: Vec<_> = (0..3).map(|_| vm.attach().unwrap()).collect();
    let summary = tc.collect_garbage(true).unwrap();
    let mut expected: Vec<_> = idle.iter().map(|t| t.id()).collect();
    expected.sort();
    let mut stolen = summary.stolen.clone();
    stolen.sort();
    assert_eq!(stolen, expected);
    assert!(summary.interrupted.is_empty());
    drop(idle);
    assert_eq!(vm.orchestrator().thread_count(), 1);
}

/// Test: Threads filling small nurseries collect for each other
#[test]
fn test_concurrent_allocation_keeps_every_thread_consistent() {
    const THREADS: usize = 4;
    const LINKS: i64 = 3000;
    let vm = boot(
        VmConfig::default()
            .with_heap(HeapConfig::default().with_nursery_size(8192).with_verify_heap(true))
            .with_spesh(SpeshConfig::default().with_enabled(false)),
    );
    let chain_sum = vm.add_routine(chain_sum_body()).unwrap();
    let array_type = Value::Obj(vm.type_object(&vm.types().array));

    let sums: Vec<Value> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let vm = &vm;
                let array_type = array_type.clone();
                s.spawn(move || {
                    let mut tc = vm.attach().unwrap();
                    tc.call_routine(chain_sum, &[array_type, Value::Int(LINKS)]).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for sum in sums {
        assert_eq!(sum, Value::Int(LINKS * (LINKS - 1) / 2));
    }
    assert!(vm.orchestrator().rounds_completed() > 0);
    vm.with_heap(|heap| assert!(heap.stats().minor_collections > 0));
}

/// Test: A thread inside the heap does not hold up allocation on another
#[test]
fn test_heap_access_does_not_stall_other_threads() {
    let vm = boot_plain();
    let mut body = FrameBody::new("box_unbox").with_params(2).with_registers(4);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Param { dest: Reg(1), index: 1 });
    body.emit(Opcode::BoxI {
        dest: Reg(2),
        src: Reg(0),
        type_reg: Reg(1),
    });
    body.emit(Opcode::UnboxI {
        dest: Reg(3),
        src: Reg(2),
    });
    body.emit(Opcode::Return { src: Reg(3) });
    let id = vm.add_routine(body).unwrap();
    let int_type = vm.type_object(&vm.types().int);
    let inside = Barrier::new(2);

    thread::scope(|s| {
        let (vm, inside) = (&vm, &inside);
        let holder = s.spawn(move || {
            vm.with_heap(|heap| {
                let _type_object = heap.get(int_type);
                inside.wait();
                thread::sleep(Duration::from_millis(500));
            })
        });
        inside.wait();
        let mut tc = vm.attach().unwrap();
        let started = Instant::now();
        let got = tc.call_routine(id, &[Value::Int(7), Value::Obj(int_type)]).unwrap();
        let elapsed = started.elapsed();
        assert_eq!(got, Value::Int(7));
        assert!(elapsed < Duration::from_millis(250), "boxing waited {:?}", elapsed);
        holder.join().unwrap();
    });
}
