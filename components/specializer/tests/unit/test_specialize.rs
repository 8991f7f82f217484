//! Candidate production end to end: stats, plan, optimize, inline, emit.

use crate::common::FakeVm;
use bytecode_system::{ArgFlag, FrameBody, Opcode, Reg};
use core_types::{StableId, StaticFrameId, ThreadId, Value};
use dispatch::{Dispatcher, DispatcherRegistry, Recorder, BOOT_CODE, BOOT_CODE_CONSTANT};
use specializer::{plan, specialize, ArgType, LogEntry, PlanKind, SpeshConfig, SpeshStats, TypeTuple};
use std::sync::Arc;

fn registry() -> DispatcherRegistry {
    let registry = DispatcherRegistry::with_boot(Default::default()).unwrap();
    registry
        .register(Dispatcher::new(
            "plus",
            Arc::new(|rec: &mut Recorder<'_>| {
                let a = rec.track_arg(0)?;
                let b = rec.track_arg(1)?;
                rec.guard_literal(a)?;
                rec.guard_literal(b)?;
                let sum = rec.value(a).as_int().unwrap_or(0) + rec.value(b).as_int().unwrap_or(0);
                rec.result_constant(Value::Int(sum))
            }),
        ))
        .unwrap();
    registry
}

fn nodelay() -> SpeshConfig {
    SpeshConfig::default().with_nodelay(true)
}

fn entry(routine: u32, callsite: bytecode_system::CallsiteId, types: TypeTuple) -> LogEntry {
    LogEntry::Entry {
        correlation: 1,
        routine: StaticFrameId(routine),
        callsite,
        types,
        depth: 1,
    }
}

#[test]
fn test_constant_dispatch_folds_away() {
    let vm = FakeVm::new();
    let registry = registry();
    let ints = vm.callsites.intern(&[ArgFlag::Int, ArgFlag::Int]);
    let one_obj = vm.callsites.intern(&[ArgFlag::Obj]);

    let mut body = FrameBody::new("five").with_registers(6).with_params(1);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::ConstI { dest: Reg(1), value: 2 });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 3 });
    body.emit_dispatch(Reg(3), "plus", ints, &[Reg(1), Reg(2)]);
    body.emit(Opcode::ConstI { dest: Reg(4), value: 5 });
    body.emit(Opcode::EqI {
        dest: Reg(5),
        a: Reg(3),
        b: Reg(4),
    });
    body.emit(Opcode::UnlessI { cond: Reg(5), target: 8 });
    body.emit(Opcode::Return { src: Reg(3) });
    body.emit(Opcode::ReturnVoid);
    let routine = vm.add_routine(1, body);

    let program = vm.warm(&routine, 0, &registry, "plus", ints, &[Value::Int(2), Value::Int(3)]);
    let types: TypeTuple = vec![Some(ArgType::plain(StableId(7), true))].into_boxed_slice();
    let mut stats = SpeshStats::new(10, 8);
    stats.update(
        ThreadId(0),
        &[
            entry(1, one_obj, types.clone()),
            LogEntry::Dispatch {
                correlation: 1,
                offset: 3,
                program,
            },
        ],
    );

    let plans = plan(&stats, &vm, &nodelay());
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].kind, PlanKind::ObservedTypes);

    let candidate = specialize(&vm, &routine, &plans[0], &stats, &nodelay()).unwrap();
    let ops: Vec<&Opcode> = candidate.bytecode.iter().map(|i| &i.opcode).collect();
    assert!(!ops.iter().any(|op| matches!(op, Opcode::Dispatch { .. })));
    assert!(!ops.iter().any(|op| op.is_guard()));
    assert!(ops.contains(&&Opcode::ConstI { dest: Reg(3), value: 5 }));
    assert!(ops.contains(&&Opcode::ConstI { dest: Reg(5), value: 1 }));
    assert!(!ops.iter().any(|op| matches!(op, Opcode::UnlessI { .. } | Opcode::ReturnVoid)));
    assert_eq!(ops.last(), Some(&&Opcode::Return { src: Reg(3) }));
    assert_eq!(candidate.types.as_ref(), Some(&types));
}

fn echo_body(callsite: bytecode_system::CallsiteId) -> FrameBody {
    let mut body = FrameBody::new("echo").with_registers(3).with_params(1);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::GetCode {
        dest: Reg(1),
        frame: StaticFrameId(2),
    });
    body.emit_dispatch(Reg(2), BOOT_CODE, callsite, &[Reg(1), Reg(0)]);
    body.emit(Opcode::Return { src: Reg(2) });
    body
}

#[test]
fn test_type_guarded_dispatch_keeps_guard_and_deopt() {
    let vm = FakeVm::new();
    let registry = registry();
    let two = vm.callsites.intern(&[ArgFlag::Obj, ArgFlag::Obj]);
    let one = vm.callsites.intern(&[ArgFlag::Obj]);

    let mut callee = FrameBody::new("id").with_registers(1).with_params(1);
    callee.emit(Opcode::Param { dest: Reg(0), index: 0 });
    callee.emit(Opcode::Return { src: Reg(0) });
    vm.add_routine(2, callee);
    let code = vm.add_code(50, 2);
    let arg = vm.add_object(60, 9, true);

    let routine = vm.add_routine(1, echo_body(two));
    vm.warm(&routine, 0, &registry, BOOT_CODE, two, &[Value::Obj(code), Value::Obj(arg)]);

    let mut stats = SpeshStats::new(10, 8);
    stats.update(ThreadId(0), &[entry(1, one, vec![None].into_boxed_slice())]);
    let plans = plan(&stats, &vm, &nodelay());
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].kind, PlanKind::Certain);

    let candidate = specialize(&vm, &routine, &plans[0], &stats, &nodelay()).unwrap();
    let ops: Vec<&Opcode> = candidate.bytecode.iter().map(|i| &i.opcode).collect();
    assert!(ops.contains(&&Opcode::SpGuardType {
        reg: Reg(1),
        stable: StableId(1),
        concrete: Some(true),
        deopt: 0,
    }));
    assert!(ops.iter().any(|op| matches!(op, Opcode::SpFastInvoke { code: Reg(1), .. })));
    // Dispatch was at offset 2 of the original
    assert_eq!(&candidate.deopts[..], &[2]);
    // Identity of the code object was never guarded, so nothing was inlined
    assert!(candidate.inlines.is_empty());
}

#[test]
fn test_known_callee_is_inlined() {
    let vm = FakeVm::new();
    let registry = registry();
    let call_shape = vm.callsites.intern(&[ArgFlag::Obj, ArgFlag::Int, ArgFlag::Int]);
    let entry_shape = vm.callsites.intern(&[ArgFlag::Obj]);

    let mut add = FrameBody::new("add").with_registers(3).with_params(2);
    add.emit(Opcode::Param { dest: Reg(0), index: 0 });
    add.emit(Opcode::Param { dest: Reg(1), index: 1 });
    add.emit(Opcode::AddI {
        dest: Reg(2),
        a: Reg(0),
        b: Reg(1),
    });
    add.emit(Opcode::Return { src: Reg(2) });
    vm.add_routine(2, add);
    let code = vm.add_code(70, 2);

    let mut body = FrameBody::new("caller").with_registers(4).with_params(1);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::ConstI { dest: Reg(1), value: 4 });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 6 });
    body.emit_dispatch(Reg(3), BOOT_CODE_CONSTANT, call_shape, &[Reg(0), Reg(1), Reg(2)]);
    body.emit(Opcode::Return { src: Reg(3) });
    let routine = vm.add_routine(1, body);
    vm.warm(
        &routine,
        0,
        &registry,
        BOOT_CODE_CONSTANT,
        call_shape,
        &[Value::Obj(code), Value::Int(4), Value::Int(6)],
    );

    let types: TypeTuple = vec![Some(ArgType::plain(StableId(1), true))].into_boxed_slice();
    let mut stats = SpeshStats::new(10, 8);
    stats.update(ThreadId(0), &[entry(1, entry_shape, types)]);
    let plans = plan(&stats, &vm, &nodelay());

    let candidate = specialize(&vm, &routine, &plans[0], &stats, &nodelay()).unwrap();
    assert_eq!(candidate.inlines.len(), 1);
    assert_eq!(candidate.inlines[0].routine, StaticFrameId(2));
    assert_eq!(candidate.inlines[0].call_offset, 3);
    assert_eq!(candidate.num_registers, 7);
    let ops: Vec<&Opcode> = candidate.bytecode.iter().map(|i| &i.opcode).collect();
    assert!(!ops.iter().any(|op| op.is_invoke()));
    assert!(ops.iter().any(|op| matches!(op, Opcode::SpGuardLiteralObj { reg: Reg(0), .. })));
    assert!(ops.contains(&&Opcode::AddI {
        dest: Reg(6),
        a: Reg(4),
        b: Reg(5),
    }));
    assert!(ops.contains(&&Opcode::Set { dest: Reg(3), src: Reg(6) }));
    assert_eq!(&candidate.slots[..], &[Value::Obj(code)]);

    let no_inline = nodelay().with_inline(false);
    let candidate = specialize(&vm, &routine, &plans[0], &stats, &no_inline).unwrap();
    assert!(candidate.inlines.is_empty());
    assert!(candidate
        .bytecode
        .iter()
        .any(|i| matches!(i.opcode, Opcode::SpFastInvoke { .. })));
}

#[test]
fn test_unlinked_dispatch_is_left_alone() {
    let vm = FakeVm::new();
    let two = vm.callsites.intern(&[ArgFlag::Obj, ArgFlag::Obj]);
    let one = vm.callsites.intern(&[ArgFlag::Obj]);
    let routine = vm.add_routine(1, echo_body(two));

    let mut stats = SpeshStats::new(10, 8);
    stats.update(ThreadId(0), &[entry(1, one, vec![None].into_boxed_slice())]);
    let plans = plan(&stats, &vm, &nodelay());
    let candidate = specialize(&vm, &routine, &plans[0], &stats, &nodelay()).unwrap();
    assert_eq!(
        candidate.bytecode.iter().map(|i| i.opcode.clone()).collect::<Vec<_>>(),
        routine.body().instructions.iter().map(|i| i.opcode.clone()).collect::<Vec<_>>()
    );
    assert!(candidate.deopts.is_empty());
}
