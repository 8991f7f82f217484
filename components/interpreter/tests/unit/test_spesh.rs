//! Specialized execution, guards and deoptimization
//!
//! These instances run the worker in blocking nodelay mode, so a routine's
//! first logged call produces its candidate before the call returns.

use super::common::{vm, vm_with};
use bytecode_system::{ArgFlag, FrameBody, Opcode, Reg};
use core_types::{StaticFrameId, Value};
use dispatch::{BOOT_CODE_CONSTANT, BOOT_CONSTANT};
use interpreter::{VmConfig, VmInstance};
use specializer::SpeshConfig;

fn eager_vm() -> VmInstance {
    vm_with(
        VmConfig::default().with_spesh(
            SpeshConfig::default()
                .with_nodelay(true)
                .with_blocking(true)
                .with_max_deopts(1),
        ),
    )
}

/// pick(x) dispatches x through boot-constant, which guards its value.
fn load_pick(vm: &VmInstance) -> StaticFrameId {
    let shape = vm.intern_callsite(&[ArgFlag::Int]);
    let mut body = FrameBody::new("pick").with_params(1).with_registers(2);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit_dispatch(Reg(1), BOOT_CONSTANT, shape, &[Reg(0)]);
    body.emit(Opcode::Return { src: Reg(1) });
    vm.add_routine(body).unwrap()
}

/// main() calls add(2, 3) through boot-code-constant.
fn load_main(vm: &VmInstance) -> StaticFrameId {
    let mut add = FrameBody::new("add").with_params(2).with_registers(3);
    add.emit(Opcode::Param { dest: Reg(0), index: 0 });
    add.emit(Opcode::Param { dest: Reg(1), index: 1 });
    add.emit(Opcode::AddI {
        dest: Reg(2),
        a: Reg(0),
        b: Reg(1),
    });
    add.emit(Opcode::Return { src: Reg(2) });
    let add = vm.add_routine(add).unwrap();

    let shape = vm.intern_callsite(&[ArgFlag::Obj, ArgFlag::Int, ArgFlag::Int]);
    let mut main = FrameBody::new("main").with_registers(4);
    main.emit(Opcode::GetCode {
        dest: Reg(0),
        frame: add,
    });
    main.emit(Opcode::ConstI { dest: Reg(1), value: 2 });
    main.emit(Opcode::ConstI { dest: Reg(2), value: 3 });
    main.emit_dispatch(Reg(3), BOOT_CODE_CONSTANT, shape, &[Reg(0), Reg(1), Reg(2)]);
    main.emit(Opcode::Return { src: Reg(3) });
    vm.add_routine(main).unwrap()
}

#[test]
fn test_first_logged_call_installs_candidate() {
    let vm = eager_vm();
    let pick = load_pick(&vm);
    let mut tc = vm.attach().unwrap();
    assert!(vm.routine(pick).unwrap().spesh().is_empty());
    assert_eq!(tc.call_routine(pick, &[Value::Int(5)]).unwrap(), Value::Int(5));
    assert_eq!(vm.routine(pick).unwrap().spesh().len(), 1);
    // Runs the candidate
    assert_eq!(tc.call_routine(pick, &[Value::Int(5)]).unwrap(), Value::Int(5));
}

#[test]
fn test_failed_guard_falls_back_and_discards_candidate() {
    let vm = eager_vm();
    let pick = load_pick(&vm);
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(pick, &[Value::Int(5)]).unwrap(), Value::Int(5));
    assert_eq!(vm.routine(pick).unwrap().spesh().len(), 1);

    // The candidate assumes 5; the original instructions resolve 7 afresh
    assert_eq!(tc.call_routine(pick, &[Value::Int(7)]).unwrap(), Value::Int(7));
    assert!(vm.routine(pick).unwrap().spesh().is_empty());
    assert_eq!(tc.stack_depth(), 0);
}

#[test]
fn test_specialized_results_match_interpreted() {
    let plain = vm();
    let eager = eager_vm();
    let plain_main = load_main(&plain);
    let eager_main = load_main(&eager);
    let mut plain_tc = plain.attach().unwrap();
    let mut eager_tc = eager.attach().unwrap();
    for _ in 0..5 {
        let expected = plain_tc.call_routine(plain_main, &[]).unwrap();
        assert_eq!(expected, Value::Int(5));
        assert_eq!(eager_tc.call_routine(eager_main, &[]).unwrap(), expected);
    }
    assert!(!eager.routine(eager_main).unwrap().spesh().is_empty());
}

#[test]
fn test_disabled_spesh_never_specializes() {
    let vm = vm();
    let pick = load_pick(&vm);
    let mut tc = vm.attach().unwrap();
    for i in 0..10 {
        assert_eq!(tc.call_routine(pick, &[Value::Int(i)]).unwrap(), Value::Int(i));
    }
    assert!(vm.routine(pick).unwrap().spesh().is_empty());
}
