//! Register values and the identifiers shared by every component.
//!
//! A [`Value`] is what lives in a VM register, an argument capture or an
//! object slot. Heap objects are never referenced directly; a value holds an
//! [`ObjRef`] handle which the heap resolves to the object's current location.

use std::fmt;
use std::sync::Arc;

/// Handle to a heap object.
///
/// Handles are stable across garbage collections: evacuating an object moves
/// it between spaces but leaves its handle unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Creates a handle from a raw location-table index.
    pub const fn from_index(index: u32) -> Self {
        ObjRef(index)
    }

    /// Returns the location-table index of this handle.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Identifies a shared type descriptor (STable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StableId(pub u32);

/// Identifies a static frame (a routine's bytecode and frame descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticFrameId(pub u32);

/// Identifies a mutator thread within one VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u16);

impl ThreadId {
    /// Index of this thread in per-thread tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The kind of a [`Value`], matching the argument flags of a callsite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value
    Null,
    /// Native 64-bit integer
    Int,
    /// Native 64-bit float
    Num,
    /// Immutable string
    Str,
    /// Reference to a heap object
    Obj,
}

/// A register value.
///
/// # Examples
///
/// ```
/// use core_types::{ObjRef, Value, ValueKind};
///
/// let n = Value::Int(42);
/// assert_eq!(n.kind(), ValueKind::Int);
/// assert_eq!(n.as_int(), Some(42));
///
/// let o = Value::Obj(ObjRef::from_index(7));
/// assert_eq!(o.as_obj(), Some(ObjRef::from_index(7)));
/// assert!(o.is_truthy());
/// ```
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// The null value; unset registers hold it
    #[default]
    Null,
    /// Native integer
    Int(i64),
    /// Native float
    Num(f64),
    /// String
    Str(Arc<str>),
    /// Heap object handle
    Obj(ObjRef),
}

impl Value {
    /// Creates a string value.
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Int(_) => ValueKind::Int,
            Value::Num(_) => ValueKind::Num,
            Value::Str(_) => ValueKind::Str,
            Value::Obj(_) => ValueKind::Obj,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float payload, if any.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the object handle, if any.
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Obj(o) => Some(*o),
            _ => None,
        }
    }

    /// Truthiness as used by conditional branches.
    ///
    /// Null, zero, NaN and the empty string are false; every object is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(i) => *i != 0,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Obj(_) => true,
        }
    }

    /// Identity comparison used by literal guards.
    ///
    /// Floats compare bitwise so that a guard on NaN is stable.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Obj(o)
    }
}
