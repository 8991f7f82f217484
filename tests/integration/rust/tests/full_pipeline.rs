//! Full Pipeline Integration Tests
//!
//! Drives the interpreter, heap, dispatch and specializer together:
//! continuations that outlive a collection, long object chains under a
//! verifying collector, and specialized runs that must agree with plain
//! interpretation.

use bytecode_system::{ArgFlag, FrameBody, Opcode, Reg};
use core_types::{StaticFrameId, Value};
use dispatch::BOOT_CONSTANT;
use integration_tests::{boot, boot_plain, chain_body, chain_sum_body};
use interpreter::{VmConfig, VmInstance};
use memory_manager::HeapConfig;
use specializer::SpeshConfig;

const TAG: i64 = 7;

/// main(array type) resets around a closure over its lexicals; the closure
/// stashes an array holding 7, captures with a handler that just returns
/// the continuation, and after resumption adds the array's element to the
/// resume value. main collects, then resumes with 10.
fn load_suspended(vm: &VmInstance) -> StaticFrameId {
    let mut keep = FrameBody::new("keep").with_params(1).with_registers(1);
    keep.emit(Opcode::Param { dest: Reg(0), index: 0 });
    keep.emit(Opcode::Return { src: Reg(0) });
    let keep = vm.add_routine(keep).unwrap();

    let body_id = StaticFrameId(keep.0 + 2);
    let mut main = FrameBody::new("main")
        .with_params(1)
        .with_registers(6)
        .with_lexicals(1);
    main.emit(Opcode::Param { dest: Reg(0), index: 0 });
    main.emit(Opcode::BindLex {
        outers: 0,
        index: 0,
        src: Reg(0),
    });
    main.emit(Opcode::ConstI { dest: Reg(1), value: TAG });
    main.emit(Opcode::GetCode {
        dest: Reg(2),
        frame: body_id,
    });
    main.emit(Opcode::TakeClosure {
        dest: Reg(2),
        src: Reg(2),
    });
    main.emit(Opcode::Reset {
        dest: Reg(3),
        tag: Reg(1),
        code: Reg(2),
    });
    main.emit(Opcode::CollectGarbage { full: true });
    main.emit(Opcode::ConstI { dest: Reg(4), value: 10 });
    main.emit(Opcode::ContinuationInvoke {
        dest: Reg(5),
        cont: Reg(3),
        value: Reg(4),
    });
    main.emit(Opcode::Return { src: Reg(5) });
    let main = vm.add_routine(main).unwrap();

    let mut body = FrameBody::new("body").with_registers(8).with_outer(main);
    body.emit(Opcode::GetLex {
        dest: Reg(0),
        outers: 1,
        index: 0,
    });
    body.emit(Opcode::Create {
        dest: Reg(1),
        type_reg: Reg(0),
    });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 7 });
    body.emit(Opcode::Push {
        array: Reg(1),
        src: Reg(2),
    });
    body.emit(Opcode::ConstI { dest: Reg(3), value: TAG });
    body.emit(Opcode::GetCode {
        dest: Reg(4),
        frame: keep,
    });
    body.emit(Opcode::Control {
        dest: Reg(5),
        protect: false,
        tag: Reg(3),
        code: Reg(4),
    });
    body.emit(Opcode::ConstI { dest: Reg(6), value: 0 });
    body.emit(Opcode::AtPos {
        dest: Reg(7),
        array: Reg(1),
        index: Reg(6),
    });
    body.emit(Opcode::AddI {
        dest: Reg(7),
        a: Reg(5),
        b: Reg(7),
    });
    body.emit(Opcode::Return { src: Reg(7) });
    assert_eq!(vm.add_routine(body).unwrap(), body_id);
    main
}

/// pick(x) returns x through boot-constant.
fn load_pick(vm: &VmInstance) -> StaticFrameId {
    let shape = vm.intern_callsite(&[ArgFlag::Int]);
    let mut body = FrameBody::new("pick").with_params(1).with_registers(2);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit_dispatch(Reg(1), BOOT_CONSTANT, shape, &[Reg(0)]);
    body.emit(Opcode::Return { src: Reg(1) });
    vm.add_routine(body).unwrap()
}

/// Test: A suspended continuation keeps its frames through a full collection
#[test]
fn test_continuation_survives_collection() {
    let vm = boot(
        VmConfig::default()
            .with_heap(HeapConfig::default().with_verify_heap(true))
            .with_spesh(SpeshConfig::default().with_enabled(false)),
    );
    let main = load_suspended(&vm);
    let array_type = Value::Obj(vm.type_object(&vm.types().array));
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(main, &[array_type.clone()]).unwrap(), Value::Int(17));
    assert_eq!(tc.call_routine(main, &[array_type]).unwrap(), Value::Int(17));
    assert_eq!(tc.stack_depth(), 0);
    vm.with_heap(|heap| assert!(heap.stats().full_collections >= 2));
}

/// Test: A 10k link chain built under a tiny nursery stays intact
#[test]
fn test_long_chain_under_verifying_collector() {
    const LINKS: i64 = 10_000;
    let vm = boot(
        VmConfig::default()
            .with_heap(HeapConfig::default().with_nursery_size(4096).with_verify_heap(true))
            .with_spesh(SpeshConfig::default().with_enabled(false)),
    );
    let chain = vm.add_routine(chain_body()).unwrap();
    let array_type = Value::Obj(vm.type_object(&vm.types().array));
    let mut tc = vm.attach().unwrap();
    let last = tc.call_routine(chain, &[array_type, Value::Int(LINKS)]).unwrap();
    tc.push_root(last.clone());
    tc.collect_garbage(true);

    let walked = vm.with_heap(|heap| {
        let mut link = last;
        let mut expected = LINKS - 1;
        while let Value::Obj(array) = link {
            assert_eq!(heap.array_at(array, 1).unwrap(), Value::Int(expected));
            link = heap.array_at(array, 0).unwrap();
            expected -= 1;
        }
        LINKS - 1 - expected
    });
    assert_eq!(walked, LINKS);
    tc.pop_roots(1);
}

/// Test: Specialized runs agree with plain interpretation
#[test]
fn test_specialized_and_plain_runs_agree() {
    let plain = boot_plain();
    let eager = boot(
        VmConfig::default().with_spesh(
            SpeshConfig::default()
                .with_nodelay(true)
                .with_blocking(true)
                .with_max_deopts(1),
        ),
    );
    let loaded: Vec<_> = [&plain, &eager]
        .iter()
        .map(|vm| {
            (
                load_pick(vm),
                vm.add_routine(chain_sum_body()).unwrap(),
                Value::Obj(vm.type_object(&vm.types().array)),
            )
        })
        .collect();
    let mut plain_tc = plain.attach().unwrap();
    let mut eager_tc = eager.attach().unwrap();

    for x in [5i64, 5, 7, 7, 5, 9] {
        let (p_pick, p_sum, p_array) = &loaded[0];
        let (e_pick, e_sum, e_array) = &loaded[1];
        let expected = plain_tc.call_routine(*p_pick, &[Value::Int(x)]).unwrap();
        assert_eq!(expected, Value::Int(x));
        assert_eq!(eager_tc.call_routine(*e_pick, &[Value::Int(x)]).unwrap(), expected);

        let args_p = [p_array.clone(), Value::Int(x * 10)];
        let args_e = [e_array.clone(), Value::Int(x * 10)];
        let expected = plain_tc.call_routine(*p_sum, &args_p).unwrap();
        assert_eq!(eager_tc.call_routine(*e_sum, &args_e).unwrap(), expected);
    }

    // Without a worker every routine keeps running unspecialized
    eager.shutdown_spesh();
    let (e_pick, _, _) = &loaded[1];
    assert_eq!(eager_tc.call_routine(*e_pick, &[Value::Int(11)]).unwrap(), Value::Int(11));
}
