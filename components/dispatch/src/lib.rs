//! Dispatch - resolution and caching of dynamic call-sites
//!
//! This component provides:
//! - A registry of dispatchers keyed by string id
//! - The recorder protocol dispatch callbacks resolve calls through
//! - Compiled guard programs that replay a resolution
//! - Per-instruction inline caches (unlinked, monomorphic, polymorphic)
//! - The boot dispatchers
//!
//! # Examples
//!
//! ```
//! use bytecode_system::CallsiteId;
//! use core_types::{ObjRef, ObjectInspector, StableId, Value};
//! use dispatch::{Capture, DispatchConfig, DispatchOutcome, DispatcherRegistry, InlineCache, Temps};
//!
//! struct NoHeap;
//! impl ObjectInspector for NoHeap {
//!     fn stable_of(&self, _: ObjRef) -> Option<StableId> { None }
//!     fn is_concrete(&self, _: ObjRef) -> bool { true }
//!     fn decont(&self, _: ObjRef) -> Option<Value> { None }
//!     fn is_rw_container(&self, _: ObjRef) -> bool { false }
//! }
//!
//! let registry = DispatcherRegistry::with_boot(DispatchConfig::default()).unwrap();
//! let cache = InlineCache::new(1, 8);
//! let args = [Value::Int(7)];
//! let capture = Capture { dispatcher: "boot-value", callsite: CallsiteId(0), args: &args };
//! let got = cache.dispatch(0, &registry, &capture, &NoHeap, &mut Temps::new()).unwrap();
//! assert_eq!(got.outcome, DispatchOutcome::Value(Value::Int(7)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boot;
pub mod config;
pub mod inline_cache;
pub mod program;
pub mod recorder;
pub mod registry;

pub use boot::{register_boot_dispatchers, BOOT_CODE, BOOT_CODE_CONSTANT, BOOT_CONSTANT, BOOT_VALUE};
pub use config::DispatchConfig;
pub use inline_cache::{CacheState, Dispatched, InlineCache, MAX_POLYMORPHISM};
pub use program::{DispatchOutcome, Outcome, Program, ProgramOp, Temps, ValueSource, MAX_TEMPS};
pub use recorder::{Capture, Recorder, Tracked};
pub use registry::{DispatchCallback, Dispatcher, DispatcherRegistry};
