//! Call Stack - region-based frame management
//!
//! This component provides:
//! - Fixed-size regions holding tagged call stack records
//! - Start-of-region sentinels so record walks never need region knowledge
//! - Promotion of individual frames to the heap
//! - Slicing the stack at a continuation boundary and splicing it back
//!
//! # Example
//!
//! ```
//! use bytecode_system::Reg;
//! use callstack::CallStack;
//! use core_types::Value;
//!
//! let mut stack = CallStack::new();
//! stack.push_continuation_tag(Value::Int(1), Reg(0));
//! let detached = stack.slice(&Value::Int(1), false).unwrap();
//! assert_eq!(detached.frame_count(), 0);
//! stack.splice(detached);
//! assert!(stack.has_tag(&Value::Int(1)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod continuation;
pub mod record;
pub mod stack;

// Re-export main types at crate root
pub use continuation::DetachedStack;
pub use record::{FrameEnv, FrameState, Record, RecordKind, ReturnTarget, SpeshFrameState};
pub use stack::{CallStack, RecordRef, Region, Walk, REGION_SIZE};
