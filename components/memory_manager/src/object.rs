//! Heap object layout
//!
//! Every heap object is a [`CollectableHeader`], the [`STable`] it was
//! allocated from, and a REPR-specific [`ObjectBody`].

use crate::header::CollectableHeader;
use crate::stable::STable;
use bytecode_system::Reg;
use callstack::{DetachedStack, FrameEnv};
use core_types::{ObjRef, StaticFrameId, Value};
use num_bigint::BigInt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A heap object.
#[derive(Debug)]
pub struct HeapObject {
    /// GC metadata
    pub header: CollectableHeader,
    /// Shared type descriptor
    pub stable: Arc<STable>,
    /// REPR-specific storage
    pub body: ObjectBody,
}

impl HeapObject {
    /// True unless this is a type object.
    pub fn is_concrete(&self) -> bool {
        !self.header.is_type_object()
    }
}

/// Element kind of a `VMArray`, fixed at compose time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySlotType {
    /// Object references (and any other value)
    Obj,
    /// Native integers
    Int,
    /// Native floats
    Num,
    /// Strings
    Str,
}

impl ArraySlotType {
    /// Value stored in unset elements.
    pub fn empty_value(self) -> Value {
        match self {
            ArraySlotType::Obj => Value::Null,
            ArraySlotType::Int => Value::Int(0),
            ArraySlotType::Num => Value::Num(0.0),
            ArraySlotType::Str => Value::Null,
        }
    }

    /// True if `value` may be stored in an element of this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ArraySlotType::Obj => true,
            ArraySlotType::Int => matches!(value, Value::Int(_)),
            ArraySlotType::Num => matches!(value, Value::Num(_)),
            ArraySlotType::Str => matches!(value, Value::Str(_) | Value::Null),
        }
    }
}

/// Storage of a `VMArray`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBody {
    /// Element kind
    pub slot_type: ArraySlotType,
    /// Elements
    pub elems: Vec<Value>,
}

/// Storage of a `P6opaque` object: one value per composed attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueBody {
    /// Attribute values, in compose order
    pub attrs: Vec<Value>,
}

/// Storage of a `Scalar` container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerBody {
    /// Contained value
    pub value: Value,
    /// Whether assignment is allowed
    pub rw: bool,
}

/// Storage of an `MVMCode` object.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBody {
    /// Routine the code runs
    pub static_frame: StaticFrameId,
    /// Routine name
    pub name: Arc<str>,
    /// Captured lexical outer (a heap frame)
    pub outer: Option<ObjRef>,
}

/// Storage of an `MVMContinuation`.
#[derive(Debug)]
pub struct ContinuationBody {
    /// The captured regions; taken when the continuation is invoked
    pub detached: Option<DetachedStack>,
    /// Register of the capturing frame that receives the resume value
    pub result_reg: Reg,
    /// Set by the first invocation
    pub invoked: AtomicBool,
}

impl ContinuationBody {
    /// True once an invocation has claimed the continuation.
    pub fn is_invoked(&self) -> bool {
        self.invoked.load(Ordering::Acquire)
    }

    /// Marks the continuation invoked; false if it already was.
    pub fn claim(&self) -> bool {
        self.invoked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Flavour of native interop object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// C struct with a fixed layout
    Struct,
    /// C array of fixed-size elements
    Array,
    /// Opaque C pointer
    Pointer,
}

/// A counted reference to an external resource such as a native library or
/// an OS handle.
///
/// Opening and closing are explicit so the count tracks exactly the objects
/// that hold the resource; dropping a handle without closing it does not
/// change the count.
#[derive(Debug)]
pub struct ExternalHandle {
    name: Arc<str>,
    open_count: Arc<AtomicUsize>,
    closed: bool,
}

impl ExternalHandle {
    /// Opens a handle on the resource tracked by `counter`.
    pub fn open(name: Arc<str>, counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        log::trace!("opened external handle '{}'", name);
        ExternalHandle {
            name,
            open_count: counter,
            closed: false,
        }
    }

    /// Opens another handle on the same resource.
    pub fn reopen(&self) -> Self {
        ExternalHandle::open(self.name.clone(), self.open_count.clone())
    }

    /// Releases the handle. Closing twice has no further effect.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_count.fetch_sub(1, Ordering::AcqRel);
            log::trace!("closed external handle '{}'", self.name);
        }
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Storage of `CStruct`, `CArray` and `CPointer` objects.
#[derive(Debug)]
pub struct NativeBody {
    /// Which interop REPR this is
    pub kind: NativeKind,
    /// Native memory
    pub buffer: Vec<u8>,
    /// Library the memory belongs to, if any
    pub library: Option<ExternalHandle>,
    /// Managed objects referenced from the native layout
    pub children: Vec<Value>,
}

/// Storage of an `MVMAsyncTask`.
#[derive(Debug)]
pub struct AsyncTaskBody {
    /// Queue results are delivered to
    pub queue: Option<ObjRef>,
    /// Code run on completion
    pub schedulee: Option<ObjRef>,
    /// OS handle owned by the task
    pub handle: Option<ExternalHandle>,
    /// Set once the task is cancelled
    pub cancelled: bool,
}

/// REPR-specific object storage.
#[derive(Debug)]
pub enum ObjectBody {
    /// Type objects carry no instance data
    TypeObject,
    /// `P6int`
    Int(i64),
    /// `P6num`
    Num(f64),
    /// `P6str`
    Str(Arc<str>),
    /// `P6bigint`
    BigInt(BigInt),
    /// `VMArray`
    Array(ArrayBody),
    /// `P6opaque`
    Opaque(OpaqueBody),
    /// `Scalar`
    Container(ContainerBody),
    /// `MVMCode`
    Code(CodeBody),
    /// `MVMFrame`
    Frame(FrameEnv),
    /// `MVMContinuation`
    Continuation(ContinuationBody),
    /// `CStruct`, `CArray`, `CPointer`
    Native(NativeBody),
    /// `MVMAsyncTask`
    AsyncTask(AsyncTaskBody),
}

impl ObjectBody {
    /// Short description used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            ObjectBody::TypeObject => "type object",
            ObjectBody::Int(_) => "int box",
            ObjectBody::Num(_) => "num box",
            ObjectBody::Str(_) => "str box",
            ObjectBody::BigInt(_) => "bigint box",
            ObjectBody::Array(_) => "array",
            ObjectBody::Opaque(_) => "opaque object",
            ObjectBody::Container(_) => "container",
            ObjectBody::Code(_) => "code object",
            ObjectBody::Frame(_) => "heap frame",
            ObjectBody::Continuation(_) => "continuation",
            ObjectBody::Native(_) => "native object",
            ObjectBody::AsyncTask(_) => "async task",
        }
    }
}
