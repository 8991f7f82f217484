//! Core value types and error handling for the VM.
//!
//! This crate provides the foundational types every other component
//! shares:
//!
//! - [`Value`] - Register values (native ints, nums, strings, object handles)
//! - [`ObjRef`], [`StableId`], [`StaticFrameId`], [`ThreadId`] - Identifiers
//! - [`VmError`] / [`ErrorKind`] - Catchable errors
//! - [`vm_panic`] - Fatal invariant violations
//! - [`ObjectInspector`] - Read-only type queries against the heap
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, Value, VmError};
//!
//! let v = Value::Int(5);
//! assert!(v.is_truthy());
//!
//! let err = VmError::adhoc(ErrorKind::Continuation, "Continuation has already been invoked");
//! assert_eq!(err.kind, ErrorKind::Continuation);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod inspect;
mod value;

pub use error::{vm_panic, ConfigError, ErrorKind, VmError, VmResult, PANIC_ALLOC, PANIC_GC, PANIC_STACK};
pub use inspect::ObjectInspector;
pub use value::{ObjRef, StableId, StaticFrameId, ThreadId, Value, ValueKind};
