//! Read-only view of heap objects used by guard evaluation.
//!
//! Dispatch programs and argument guard trees only ever need to ask a few
//! questions about an object. Keeping them behind a trait lets those
//! components run against the heap without depending on it.

use crate::{ObjRef, StableId, Value};

/// Answers type questions about heap objects.
pub trait ObjectInspector {
    /// The STable of an object, or `None` for a dead handle.
    fn stable_of(&self, obj: ObjRef) -> Option<StableId>;

    /// True for instances, false for type objects.
    fn is_concrete(&self, obj: ObjRef) -> bool;

    /// The value held by a container, or `None` if `obj` is not one.
    fn decont(&self, obj: ObjRef) -> Option<Value>;

    /// True if `obj` is a container that accepts assignment.
    fn is_rw_container(&self, obj: ObjRef) -> bool;
}
