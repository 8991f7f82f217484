//! Built-in REPRs.

mod array;
mod async_task;
mod boxed;
mod code;
mod container;
mod continuation;
mod native;
mod opaque;

pub use array::VmArray;
pub use async_task::AsyncTaskRepr;
pub use boxed::{P6BigInt, P6Int, P6Num, P6Str};
pub use code::{CodeRepr, FrameRepr};
pub use container::ScalarRepr;
pub use continuation::ContinuationRepr;
pub use native::NativeRepr;
pub use opaque::P6Opaque;

use crate::object::{NativeKind, ObjectBody};
use crate::repr::Repr;
use core_types::{ErrorKind, VmError};
use std::sync::Arc;

/// Every built-in REPR, in registration order.
pub fn builtins() -> Vec<Arc<dyn Repr>> {
    vec![
        Arc::new(P6Int),
        Arc::new(P6Num),
        Arc::new(P6Str),
        Arc::new(P6BigInt),
        Arc::new(VmArray),
        Arc::new(P6Opaque),
        Arc::new(ScalarRepr),
        Arc::new(CodeRepr),
        Arc::new(FrameRepr),
        Arc::new(ContinuationRepr),
        Arc::new(NativeRepr::new(NativeKind::Struct)),
        Arc::new(NativeRepr::new(NativeKind::Array)),
        Arc::new(NativeRepr::new(NativeKind::Pointer)),
        Arc::new(AsyncTaskRepr),
    ]
}

/// Error for a body that does not belong to the REPR handling it.
pub(crate) fn mismatched(repr: &str, body: &ObjectBody) -> VmError {
    VmError::adhoc(
        ErrorKind::Repr,
        format!("REPR {} cannot operate on a {}", repr, body.describe()),
    )
}
