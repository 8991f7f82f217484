//! Specializer - statistics-driven specialization of hot routines
//!
//! This component provides:
//! - Per-thread spesh logs batched to a worker thread
//! - Stats per routine, callsite shape and argument type tuple
//! - A planner choosing which specializations to produce
//! - Argument guard trees selecting a candidate at frame entry
//! - A basic-block optimizer with fact propagation, dispatch-site
//!   rewriting and inlining
//! - Deoptimization back to the original instructions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arg_guard;
pub mod candidate;
pub mod config;
pub mod deopt;
pub mod graph;
pub mod inline;
pub mod optimize;
pub mod planner;
pub mod routine;
pub mod specialize;
pub mod spesh_log;
pub mod stats;
pub mod threshold;
pub mod worker;

// Re-export main types
pub use arg_guard::{max_new_nodes, GuardNode, GuardOp, GuardSpec, GuardTree};
pub use candidate::{Candidate, InlineRecord, SpeshState};
pub use config::SpeshConfig;
pub use deopt::{deoptimize, DeoptInfo, DeoptReason};
pub use graph::{BasicBlock, SpeshGraph, SpeshIns};
pub use inline::{check_inlinable, InliningRejection};
pub use optimize::{Facts, InlineSite, Optimizer};
pub use planner::{plan, Plan, PlanKind};
pub use routine::{Routine, SpeshHost};
pub use specialize::specialize;
pub use spesh_log::{ArgType, LogBatch, LogEntry, ObservedType, SpeshLog, TypeTuple, WorkerMessage};
pub use stats::{FrameKey, SpeshStats};
pub use threshold::threshold;
pub use worker::SpeshWorker;
