//! Heap error types.

use core_types::ObjRef;
use thiserror::Error;

/// Allocation that cannot be satisfied. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Every object handle is in use
    #[error("object handle space exhausted")]
    HandlesExhausted,
    /// An object too large to account
    #[error("object of {0} bytes is too large to allocate")]
    TooLarge(usize),
}

/// A broken heap invariant found by `Heap::verify`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapInvariantViolation {
    /// A gen2 object references a nursery object without being remembered
    #[error("gen2 object {owner} references nursery object {target} but is not in a remembered set")]
    UnrememberedOldToYoung {
        /// The gen2 owner
        owner: ObjRef,
        /// The nursery object it references
        target: ObjRef,
    },
    /// An object references a handle that was freed
    #[error("object {owner} references freed handle {target}")]
    DanglingReference {
        /// The referencing object
        owner: ObjRef,
        /// The freed handle
        target: ObjRef,
    },
    /// The location table and the object disagree about the handle
    #[error("location of handle {0} holds a different object")]
    HandleMismatch(ObjRef),
}

