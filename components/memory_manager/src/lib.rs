//! Memory Manager - object model and garbage collector
//!
//! This component provides:
//! - STables and REPRs: per-type metadata and pluggable object layouts
//! - Generational heap: per-thread semispace nurseries plus a size-classed
//!   second generation, with per-object locking instead of a heap-wide lock
//! - Write barrier funnel and remembered sets
//! - Stop-the-world orchestration across mutator threads
//! - Heap verification for debugging collector bugs

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod gen2;
pub mod header;
pub mod heap;
pub mod nursery;
pub mod object;
pub mod orchestrate;
pub mod repr;
pub mod reprs;
pub mod stable;
pub mod table;
pub mod worklist;
pub mod write_barrier;

// Re-export main types
pub use config::HeapConfig;
pub use error::{AllocError, HeapInvariantViolation};
pub use header::{CollectableHeader, HeaderFlags, Location};
pub use heap::{BodyGuard, CollectionKind, GcReport, GcStats, Heap, ObjectGuard};
pub use object::{
    ArrayBody, ArraySlotType, AsyncTaskBody, CodeBody, ContainerBody, ContinuationBody,
    ExternalHandle, HeapObject, NativeBody, NativeKind, ObjectBody, OpaqueBody,
};
pub use orchestrate::{BlockedGuard, GcRound, GcStatus, Orchestrator, ThreadSlot};
pub use repr::{
    ComposeInfo, Composable, Copyable, Freeable, Initializable, Markable, Repr, ReprData,
    ReprEntry, ReprId, ReprRegistry, StorageSpec,
};
pub use stable::{InvocationHandler, STable, STableRegistry};
pub use table::SegmentedTable;
pub use worklist::Worklist;
