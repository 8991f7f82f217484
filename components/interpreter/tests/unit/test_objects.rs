//! Object operations: boxing, type tests, attributes, arrays, containers

use super::common::vm;
use bytecode_system::{FrameBody, Opcode, Reg};
use core_types::{ErrorKind, ObjRef, Value};
use interpreter::VmInstance;
use memory_manager::{ComposeInfo, InvocationHandler};
use std::sync::Arc;

/// Reads the elements of an array the host got back from a call.
fn elems(vm: &VmInstance, array: &Value) -> Vec<Value> {
    let array = array.as_obj().unwrap();
    vm.with_heap(|heap| {
        let n = heap.array_elems(array).unwrap();
        (0..n).map(|i| heap.array_at(array, i).unwrap()).collect()
    })
}

fn point_type(vm: &VmInstance) -> ObjRef {
    vm.new_type(
        "Point",
        "P6opaque",
        Some(&ComposeInfo {
            attributes: vec![Arc::from("x"), Arc::from("y")],
            ..Default::default()
        }),
    )
    .unwrap()
}

#[test]
fn test_box_unbox_and_type_tests() {
    let vm = vm();
    // (array type, Int type, Num type) -> [unboxed, is Int, is Num, concrete, type object concrete]
    let mut body = FrameBody::new("boxing").with_params(3).with_registers(10);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Param { dest: Reg(1), index: 1 });
    body.emit(Opcode::Param { dest: Reg(2), index: 2 });
    body.emit(Opcode::Create {
        dest: Reg(3),
        type_reg: Reg(0),
    });
    body.emit(Opcode::ConstI { dest: Reg(4), value: 7 });
    body.emit(Opcode::BoxI {
        dest: Reg(5),
        src: Reg(4),
        type_reg: Reg(1),
    });
    body.emit(Opcode::UnboxI {
        dest: Reg(6),
        src: Reg(5),
    });
    body.emit(Opcode::Push {
        array: Reg(3),
        src: Reg(6),
    });
    body.emit(Opcode::IsType {
        dest: Reg(7),
        src: Reg(5),
        type_reg: Reg(1),
    });
    body.emit(Opcode::Push {
        array: Reg(3),
        src: Reg(7),
    });
    body.emit(Opcode::IsType {
        dest: Reg(7),
        src: Reg(5),
        type_reg: Reg(2),
    });
    body.emit(Opcode::Push {
        array: Reg(3),
        src: Reg(7),
    });
    body.emit(Opcode::IsConcrete {
        dest: Reg(8),
        src: Reg(5),
    });
    body.emit(Opcode::Push {
        array: Reg(3),
        src: Reg(8),
    });
    body.emit(Opcode::IsConcrete {
        dest: Reg(9),
        src: Reg(1),
    });
    body.emit(Opcode::Push {
        array: Reg(3),
        src: Reg(9),
    });
    body.emit(Opcode::Return { src: Reg(3) });
    let id = vm.add_routine(body).unwrap();

    let types = vm.types().clone();
    let args = [
        Value::Obj(vm.type_object(&types.array)),
        Value::Obj(vm.type_object(&types.int)),
        Value::Obj(vm.type_object(&types.num)),
    ];
    let result = vm.attach().unwrap().call_routine(id, &args).unwrap();
    assert_eq!(
        elems(&vm, &result),
        vec![Value::Int(7), Value::Int(1), Value::Int(0), Value::Int(1), Value::Int(0)]
    );
}

#[test]
fn test_string_and_float_boxes() {
    let vm = vm();
    let mut body = FrameBody::new("strs").with_params(1).with_registers(3);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::ConstS {
        dest: Reg(1),
        value: "boxed".into(),
    });
    body.emit(Opcode::BoxS {
        dest: Reg(2),
        src: Reg(1),
        type_reg: Reg(0),
    });
    body.emit(Opcode::UnboxS {
        dest: Reg(1),
        src: Reg(2),
    });
    body.emit(Opcode::Return { src: Reg(1) });
    let strs = vm.add_routine(body).unwrap();

    let mut tc = vm.attach().unwrap();
    let str_type = Value::Obj(vm.type_object(&vm.types().str));
    assert_eq!(tc.call_routine(strs, &[str_type]).unwrap(), Value::str("boxed"));
    // Boxing a string into an Int type is a type error
    let int_type = Value::Obj(vm.type_object(&vm.types().int));
    assert_eq!(tc.call_routine(strs, &[int_type]).unwrap_err().kind, ErrorKind::TypeCheck);
}

#[test]
fn test_attributes() {
    let vm = vm();
    let point = point_type(&vm);
    let mut body = FrameBody::new("attrs").with_params(1).with_registers(4);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Create {
        dest: Reg(1),
        type_reg: Reg(0),
    });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 5 });
    body.emit(Opcode::BindAttr {
        obj: Reg(1),
        slot: 1,
        src: Reg(2),
    });
    body.emit(Opcode::GetAttr {
        dest: Reg(3),
        obj: Reg(1),
        slot: 1,
    });
    body.emit(Opcode::Return { src: Reg(3) });
    let attrs = vm.add_routine(body).unwrap();

    let mut body = FrameBody::new("bad_slot").with_params(1).with_registers(3);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Create {
        dest: Reg(1),
        type_reg: Reg(0),
    });
    body.emit(Opcode::GetAttr {
        dest: Reg(2),
        obj: Reg(1),
        slot: 9,
    });
    body.emit(Opcode::Return { src: Reg(2) });
    let bad = vm.add_routine(body).unwrap();

    let mut tc = vm.attach().unwrap();
    assert_eq!(tc.call_routine(attrs, &[Value::Obj(point)]).unwrap(), Value::Int(5));
    assert_eq!(
        tc.call_routine(bad, &[Value::Obj(point)]).unwrap_err().kind,
        ErrorKind::Bounds
    );
}

#[test]
fn test_array_positional_ops() {
    let vm = vm();
    let mut body = FrameBody::new("arrays").with_params(1).with_registers(6);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Create {
        dest: Reg(1),
        type_reg: Reg(0),
    });
    body.emit(Opcode::ConstI { dest: Reg(2), value: 3 });
    body.emit(Opcode::ConstS {
        dest: Reg(3),
        value: "end".into(),
    });
    body.emit(Opcode::BindPos {
        array: Reg(1),
        index: Reg(2),
        src: Reg(3),
    });
    body.emit(Opcode::Elems {
        dest: Reg(4),
        array: Reg(1),
    });
    body.emit(Opcode::Push {
        array: Reg(1),
        src: Reg(4),
    });
    body.emit(Opcode::ConstI { dest: Reg(5), value: -2 });
    body.emit(Opcode::AtPos {
        dest: Reg(5),
        array: Reg(1),
        index: Reg(5),
    });
    body.emit(Opcode::Push {
        array: Reg(1),
        src: Reg(5),
    });
    body.emit(Opcode::Return { src: Reg(1) });
    let id = vm.add_routine(body).unwrap();

    let array_type = Value::Obj(vm.type_object(&vm.types().array));
    let result = vm.attach().unwrap().call_routine(id, &[array_type]).unwrap();
    assert_eq!(
        elems(&vm, &result),
        vec![
            Value::Null,
            Value::Null,
            Value::Null,
            Value::str("end"),
            Value::Int(4),
            Value::str("end"),
        ]
    );
}

#[test]
fn test_containers() {
    let vm = vm();
    let mut body = FrameBody::new("assign").with_params(1).with_registers(3);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::ConstI { dest: Reg(1), value: 9 });
    body.emit(Opcode::Assign {
        container: Reg(0),
        src: Reg(1),
    });
    body.emit(Opcode::Decont {
        dest: Reg(2),
        src: Reg(0),
    });
    body.emit(Opcode::Return { src: Reg(2) });
    let assign = vm.add_routine(body).unwrap();

    let mut tc = vm.attach().unwrap();
    let scalar = vm.types().scalar.clone();
    let (rw, ro) = tc.with_heap(|heap, me| {
        (
            heap.new_container(me, &scalar, Value::Int(1), true).unwrap(),
            heap.new_container(me, &scalar, Value::Int(1), false).unwrap(),
        )
    });
    assert_eq!(tc.call_routine(assign, &[Value::Obj(rw)]).unwrap(), Value::Int(9));
    assert_eq!(
        tc.call_routine(assign, &[Value::Obj(ro)]).unwrap_err().kind,
        ErrorKind::TypeCheck
    );
}

#[test]
fn test_invocation_through_attribute() {
    let vm = vm();
    let mut answer = FrameBody::new("answer").with_registers(1);
    answer.emit(Opcode::ConstI { dest: Reg(0), value: 42 });
    answer.emit(Opcode::Return { src: Reg(0) });
    let answer = vm.add_routine(answer).unwrap();
    let code = vm.static_code(answer).unwrap();

    let callable = vm
        .new_type(
            "Callable",
            "P6opaque",
            Some(&ComposeInfo {
                attributes: vec![Arc::from("code")],
                ..Default::default()
            }),
        )
        .unwrap();
    let st = vm.with_heap(|heap| heap.stable(callable));
    st.set_invocation(InvocationHandler::AttributeCode(0));

    let mut tc = vm.attach().unwrap();
    let wrapper = tc.with_heap(|heap, me| {
        let obj = heap.create(me, &st).unwrap();
        heap.bind_attribute(me, obj, 0, Value::Obj(code)).unwrap();
        obj
    });
    assert_eq!(tc.call(wrapper, &[]).unwrap(), Value::Int(42));

    // Neither code nor invocable
    let point = point_type(&vm);
    let plain = tc.with_heap(|heap, me| {
        let st = heap.stable(point);
        heap.create(me, &st).unwrap()
    });
    assert_eq!(tc.call(plain, &[]).unwrap_err().kind, ErrorKind::TypeCheck);
}
