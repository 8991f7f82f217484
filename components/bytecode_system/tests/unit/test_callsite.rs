//! Callsite interning through the public API

use bytecode_system::{ArgFlag, CallsiteInterner};
use core_types::{ObjRef, Value};

#[test]
fn test_flag_of_values() {
    assert_eq!(ArgFlag::of(&Value::Int(1)), ArgFlag::Int);
    assert_eq!(ArgFlag::of(&Value::Num(1.0)), ArgFlag::Num);
    assert_eq!(ArgFlag::of(&Value::str("s")), ArgFlag::Str);
    assert_eq!(ArgFlag::of(&Value::Obj(ObjRef::from_index(0))), ArgFlag::Obj);
    assert_eq!(ArgFlag::of(&Value::Null), ArgFlag::Obj);
}

#[test]
fn test_empty_callsite_interns() {
    let interner = CallsiteInterner::default();
    assert!(interner.is_empty());
    let id = interner.intern(&[]);
    assert_eq!(interner.get(id).unwrap().num_pos(), 0);
    assert!(!interner.is_empty());
}

#[test]
fn test_distinct_orders_are_distinct_shapes() {
    let interner = CallsiteInterner::new();
    let a = interner.intern(&[ArgFlag::Int, ArgFlag::Obj]);
    let b = interner.intern(&[ArgFlag::Obj, ArgFlag::Int]);
    assert_ne!(a, b);
}
