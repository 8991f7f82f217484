//! Call stack behaviour through the public API

use bytecode_system::{CallsiteId, Reg};
use callstack::{CallStack, FrameEnv, FrameState, RecordKind, ReturnTarget};
use core_types::{ObjRef, StaticFrameId, Value};
use std::sync::Arc;

fn push(stack: &mut CallStack, id: u32, lexical: Value) {
    stack.push_frame(
        FrameState {
            static_frame: StaticFrameId(id),
            code: None,
            pc: 0,
            bytecode: Arc::from(Vec::new()),
            spesh: None,
            work: vec![Value::Null; 4],
            args: Vec::new(),
            callsite: CallsiteId(0),
            return_to: ReturnTarget::Discard,
            correlation: id,
        },
        FrameEnv {
            static_frame: StaticFrameId(id),
            lexicals: vec![lexical],
            outer: None,
        },
    );
}

#[test]
fn test_promoted_frame_stays_usable() {
    let mut stack = CallStack::new();
    push(&mut stack, 1, Value::Int(10));
    push(&mut stack, 2, Value::Int(20));
    let below = stack.walk().nth(1).map(|(at, _)| at).unwrap();

    let mut heap_envs = Vec::new();
    let frame = stack.promote_to_heap(below, &mut |env| {
        heap_envs.push(env);
        ObjRef::from_index(heap_envs.len() as u32)
    });
    assert_eq!(heap_envs.len(), 1);
    assert_eq!(heap_envs[0].lexicals, vec![Value::Int(10)]);

    // work registers stay on the stack and are still writable
    stack.frame_state_mut(below).unwrap().work[0] = Value::Int(99);
    assert_eq!(stack.frame_state(below).unwrap().work[0], Value::Int(99));
    assert_eq!(stack.get(below).unwrap().heap_frame(), Some(frame));

    // the frame above is untouched
    let top = stack.current_frame().unwrap();
    assert_eq!(stack.get(top).unwrap().kind(), RecordKind::Frame);
}

#[test]
fn test_generator_style_reentry() {
    // reset; control; splice back; the tag is reachable again each time
    let tag = Value::str("yield");
    let mut stack = CallStack::new();
    push(&mut stack, 0, Value::Null);
    stack.push_continuation_tag(tag.clone(), Reg(2));
    push(&mut stack, 1, Value::Null);

    for _ in 0..3 {
        let detached = stack.slice(&tag, false).unwrap();
        assert_eq!(stack.depth(), 1);
        stack.splice(detached);
        assert_eq!(stack.depth(), 2);
    }
}

#[test]
fn test_dispatch_records_are_walkable() {
    let mut stack = CallStack::new();
    push(&mut stack, 0, Value::Null);
    stack.push_dispatch_record(Arc::from("plus"));
    stack.push_dispatch_run(vec![Value::Int(1), Value::Int(2)]);
    let kinds: Vec<RecordKind> = stack.walk().map(|(_, r)| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![RecordKind::DispatchRun, RecordKind::DispatchRecord, RecordKind::Frame]
    );
    stack.pop();
    stack.pop();
    assert_eq!(stack.top().unwrap().kind(), RecordKind::Frame);
}

#[test]
fn test_clear_resets_everything() {
    let mut stack = CallStack::new();
    for i in 0..5 {
        push(&mut stack, i, Value::Null);
    }
    stack.clear();
    assert!(stack.is_empty());
    assert_eq!(stack.current_region(), 0);
}
