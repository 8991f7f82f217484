//! Collections triggered from running code and from the host

use super::common::{vm, vm_with};
use bytecode_system::{FrameBody, Opcode, Reg};
use core_types::Value;
use interpreter::VmConfig;
use memory_manager::HeapConfig;
use specializer::SpeshConfig;

/// (array type, n) -> array of n one-element arrays [i]
fn nested_arrays() -> FrameBody {
    let mut body = FrameBody::new("nested").with_params(2).with_registers(7);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Param { dest: Reg(1), index: 1 });
    body.emit(Opcode::Create {
        dest: Reg(2),
        type_reg: Reg(0),
    });
    body.emit(Opcode::ConstI { dest: Reg(3), value: 0 });
    body.emit(Opcode::ConstI { dest: Reg(4), value: 1 });
    let top = body.emit(Opcode::LtI {
        dest: Reg(5),
        a: Reg(3),
        b: Reg(1),
    });
    let exit = body.emit(Opcode::UnlessI { cond: Reg(5), target: 0 });
    body.emit(Opcode::Create {
        dest: Reg(6),
        type_reg: Reg(0),
    });
    body.emit(Opcode::Push {
        array: Reg(6),
        src: Reg(3),
    });
    body.emit(Opcode::Push {
        array: Reg(2),
        src: Reg(6),
    });
    body.emit(Opcode::AddI {
        dest: Reg(3),
        a: Reg(3),
        b: Reg(4),
    });
    body.emit(Opcode::Goto { target: top });
    let done = body.emit(Opcode::Return { src: Reg(2) });
    body.patch_target(exit, done);
    body
}

#[test]
fn test_allocation_heavy_run_collects_and_keeps_live_data() {
    let vm = vm_with(
        VmConfig::default()
            .with_heap(HeapConfig::default().with_nursery_size(4096).with_verify_heap(true))
            .with_spesh(SpeshConfig::default().with_enabled(false)),
    );
    let id = vm.add_routine(nested_arrays()).unwrap();
    let array_type = Value::Obj(vm.type_object(&vm.types().array));
    let mut tc = vm.attach().unwrap();
    let outer = tc.call_routine(id, &[array_type, Value::Int(2000)]).unwrap().as_obj().unwrap();

    vm.with_heap(|heap| {
        assert!(heap.stats().minor_collections > 0);
        assert_eq!(heap.array_elems(outer).unwrap(), 2000);
        for i in [0i64, 1, 999, 1999] {
            let inner = heap.array_at(outer, i).unwrap().as_obj().unwrap();
            assert_eq!(heap.array_at(inner, 0).unwrap(), Value::Int(i));
        }
    });
}

#[test]
fn test_host_roots_survive_and_the_rest_is_freed() {
    let vm = vm();
    let mut tc = vm.attach().unwrap();
    let int = vm.types().int.clone();
    let (kept, dropped) = tc.with_heap(|heap, me| {
        (
            heap.box_value(me, &int, Value::Int(1)).unwrap(),
            heap.box_value(me, &int, Value::Int(2)).unwrap(),
        )
    });
    tc.push_root(Value::Obj(kept));
    let summary = tc.collect_garbage(true).unwrap();
    assert_eq!(summary.coordinator, tc.id());
    assert!(summary.report.freed >= 1);
    vm.with_heap(|heap| {
        assert_eq!(heap.unbox_int(kept).unwrap(), 1);
        assert!(!heap.is_alive(dropped));
    });

    tc.pop_roots(1);
    tc.collect_garbage(true);
    assert!(vm.with_heap(|heap| !heap.is_alive(kept)));
}

#[test]
fn test_idle_thread_is_collected_for() {
    let vm = vm();
    let mut tc = vm.attach().unwrap();
    let mut idle = vm.attach().unwrap();
    let int = vm.types().int.clone();
    let held = idle.with_heap(|heap, me| heap.box_value(me, &int, Value::Int(3)).unwrap());
    idle.push_root(Value::Obj(held));

    let summary = tc.collect_garbage(false).unwrap();
    assert_eq!(summary.stolen, vec![idle.id()]);
    assert!(summary.interrupted.is_empty());
    assert_eq!(vm.with_heap(|heap| heap.unbox_int(held).unwrap()), 3);
}

#[test]
fn test_collect_opcode_keeps_registers() {
    let vm = vm();
    let mut body = FrameBody::new("collect").with_params(1).with_registers(4);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Create {
        dest: Reg(1),
        type_reg: Reg(0),
    });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 11 });
    body.emit(Opcode::Push {
        array: Reg(1),
        src: Reg(2),
    });
    body.emit(Opcode::CollectGarbage { full: true });
    body.emit(Opcode::Safepoint);
    body.emit(Opcode::ConstI { dest: Reg(2), value: 0 });
    body.emit(Opcode::AtPos {
        dest: Reg(3),
        array: Reg(1),
        index: Reg(2),
    });
    body.emit(Opcode::Return { src: Reg(3) });
    let id = vm.add_routine(body).unwrap();

    let array_type = Value::Obj(vm.type_object(&vm.types().array));
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(id, &[array_type]).unwrap(), Value::Int(11));
    assert!(vm.with_heap(|heap| heap.stats().full_collections) >= 1);
}
