//! Reset, control and continuation invocation

use super::common::{run, vm};
use bytecode_system::{CallsiteId, FrameBody, Opcode, Reg};
use callstack::{CallStack, FrameEnv, FrameState, ReturnTarget};
use core_types::{ErrorKind, ObjRef, StaticFrameId, Value};
use interpreter::{ThreadContext, VmInstance};
use std::sync::Arc;

const TAG: i64 = 1;

/// `main` resets with TAG around `body`; `body` captures with `handler`
/// and adds 100 to whatever the capture delivers. Returns `main`.
fn load(vm: &VmInstance, handler: FrameBody, protect: bool) -> StaticFrameId {
    let handler = vm.add_routine(handler).unwrap();

    let mut body = FrameBody::new("body").with_registers(5);
    body.emit(Opcode::ConstI { dest: Reg(0), value: TAG });
    body.emit(Opcode::GetCode {
        dest: Reg(1),
        frame: handler,
    });
    body.emit(Opcode::Control {
        dest: Reg(2),
        protect,
        tag: Reg(0),
        code: Reg(1),
    });
    body.emit(Opcode::ConstI { dest: Reg(3), value: 100 });
    body.emit(Opcode::AddI {
        dest: Reg(4),
        a: Reg(2),
        b: Reg(3),
    });
    body.emit(Opcode::Return { src: Reg(4) });
    let body = vm.add_routine(body).unwrap();

    let mut main = FrameBody::new("main").with_registers(3);
    main.emit(Opcode::ConstI { dest: Reg(0), value: TAG });
    main.emit(Opcode::GetCode {
        dest: Reg(1),
        frame: body,
    });
    main.emit(Opcode::Reset {
        dest: Reg(2),
        tag: Reg(0),
        code: Reg(1),
    });
    main.emit(Opcode::Return { src: Reg(2) });
    vm.add_routine(main).unwrap()
}

/// Resumes the continuation with 5 and adds 1000 to its result.
fn resuming_handler() -> FrameBody {
    let mut h = FrameBody::new("handler").with_params(1).with_registers(5);
    h.emit(Opcode::Param { dest: Reg(0), index: 0 });
    h.emit(Opcode::ConstI { dest: Reg(1), value: 5 });
    h.emit(Opcode::ContinuationInvoke {
        dest: Reg(2),
        cont: Reg(0),
        value: Reg(1),
    });
    h.emit(Opcode::ConstI { dest: Reg(3), value: 1000 });
    h.emit(Opcode::AddI {
        dest: Reg(4),
        a: Reg(2),
        b: Reg(3),
    });
    h.emit(Opcode::Return { src: Reg(4) });
    h
}

fn aborting_handler() -> FrameBody {
    let mut h = FrameBody::new("handler").with_params(1).with_registers(1);
    h.emit(Opcode::ConstI { dest: Reg(0), value: 42 });
    h.emit(Opcode::Return { src: Reg(0) });
    h
}

#[test]
fn test_resume_delivers_into_control() {
    let vm = vm();
    let main = load(&vm, resuming_handler(), false);
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(main, &[]).unwrap(), Value::Int(1105));
    assert_eq!(tc.stack_depth(), 0);
    // The stack is reusable after slicing and splicing
    assert_eq!(tc.call_routine(main, &[]).unwrap(), Value::Int(1105));
}

#[test]
fn test_handler_result_replaces_reset() {
    let vm = vm();
    let main = load(&vm, aborting_handler(), false);
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(main, &[]).unwrap(), Value::Int(42));
    assert_eq!(tc.stack_depth(), 0);
}

#[test]
fn test_protected_boundary_is_popped() {
    let vm = vm();
    let main = load(&vm, aborting_handler(), true);
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(main, &[]).unwrap(), Value::Int(42));
    assert_eq!(tc.stack_depth(), 0);
}

#[test]
fn test_continuation_runs_once() {
    let vm = vm();
    let mut h = FrameBody::new("twice").with_params(1).with_registers(4);
    h.emit(Opcode::Param { dest: Reg(0), index: 0 });
    h.emit(Opcode::ConstI { dest: Reg(1), value: 5 });
    h.emit(Opcode::ContinuationInvoke {
        dest: Reg(2),
        cont: Reg(0),
        value: Reg(1),
    });
    h.emit(Opcode::ContinuationInvoke {
        dest: Reg(3),
        cont: Reg(0),
        value: Reg(1),
    });
    h.emit(Opcode::Return { src: Reg(3) });
    let main = load(&vm, h, false);
    let mut tc = vm.attach().unwrap();
    let err = tc.call_routine(main, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Continuation);
    assert_eq!(tc.stack_depth(), 0);
}

#[test]
fn test_clone_allows_a_second_resume() {
    let vm = vm();
    let mut h = FrameBody::new("clone").with_params(1).with_registers(7);
    h.emit(Opcode::Param { dest: Reg(0), index: 0 });
    h.emit(Opcode::ContinuationClone {
        dest: Reg(1),
        src: Reg(0),
    });
    h.emit(Opcode::ConstI { dest: Reg(2), value: 5 });
    h.emit(Opcode::ContinuationInvoke {
        dest: Reg(3),
        cont: Reg(0),
        value: Reg(2),
    });
    h.emit(Opcode::ConstI { dest: Reg(4), value: 10 });
    h.emit(Opcode::ContinuationInvoke {
        dest: Reg(5),
        cont: Reg(1),
        value: Reg(4),
    });
    h.emit(Opcode::AddI {
        dest: Reg(6),
        a: Reg(3),
        b: Reg(5),
    });
    h.emit(Opcode::Return { src: Reg(6) });
    let main = load(&vm, h, false);
    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(main, &[]).unwrap(), Value::Int(105 + 110));
}

#[test]
fn test_control_without_reset() {
    let vm = vm();
    let handler = vm.add_routine(aborting_handler()).unwrap();
    let mut body = FrameBody::new("lonely").with_registers(3);
    body.emit(Opcode::ConstI { dest: Reg(0), value: TAG });
    body.emit(Opcode::GetCode {
        dest: Reg(1),
        frame: handler,
    });
    body.emit(Opcode::Control {
        dest: Reg(2),
        protect: false,
        tag: Reg(0),
        code: Reg(1),
    });
    body.emit(Opcode::Return { src: Reg(2) });
    let err = run(&vm, body, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Continuation);
}

/// A continuation over one frame of `registers` registers that delivers its
/// result into `result_reg`.
fn host_continuation(vm: &VmInstance, tc: &ThreadContext, registers: usize, result_reg: Reg) -> ObjRef {
    let tag = Value::Int(TAG);
    let mut stack = CallStack::new();
    stack.push_continuation_tag(tag.clone(), Reg(0));
    stack.push_frame(
        FrameState {
            static_frame: StaticFrameId(0),
            code: None,
            pc: 0,
            bytecode: Arc::from(Vec::new()),
            spesh: None,
            work: vec![Value::Null; registers],
            args: Vec::new(),
            callsite: CallsiteId(0),
            return_to: ReturnTarget::Register(Reg(0)),
            correlation: 0,
        },
        FrameEnv {
            static_frame: StaticFrameId(0),
            lexicals: Vec::new(),
            outer: None,
        },
    );
    let detached = stack.slice(&tag, false).unwrap();
    let st = vm.types().continuation.clone();
    tc.with_heap(|heap, me| heap.new_continuation(me, &st, detached, result_reg))
        .unwrap()
}

#[test]
fn test_failed_resume_leaves_continuation_unclaimed() {
    let vm = vm();
    let mut h = FrameBody::new("resume").with_params(1).with_registers(3);
    h.emit(Opcode::Param { dest: Reg(0), index: 0 });
    h.emit(Opcode::ConstI { dest: Reg(1), value: 5 });
    h.emit(Opcode::ContinuationInvoke {
        dest: Reg(2),
        cont: Reg(0),
        value: Reg(1),
    });
    h.emit(Opcode::Return { src: Reg(2) });
    let resume = vm.add_routine(h).unwrap();

    let mut tc = vm.attach().unwrap();
    let cont = host_continuation(&vm, &tc, 1, Reg(4));
    tc.push_root(Value::Obj(cont));
    let err = tc.call_routine(resume, &[Value::Obj(cont)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Bytecode);
    assert_eq!(tc.stack_depth(), 0);

    // Still claimable after the rejected resume
    let (detached, result_reg) = vm
        .with_heap(|heap| heap.take_continuation(cont, |_, _| Ok(())))
        .unwrap();
    assert_eq!(result_reg, Reg(4));
    assert_eq!(detached.frame_count(), 1);
    tc.pop_roots(1);
}
