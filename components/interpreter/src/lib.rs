//! Register VM interpreter
//!
//! This crate ties the components together into a running VM:
//! - [`VmInstance`] owns the heap, type registries, dispatchers, loaded
//!   routines and the spesh worker
//! - [`ThreadContext`] is one attached thread: its call stack, spesh log and
//!   place in stop-the-world collections
//! - The run loop executes frames, entering specialized code when a
//!   candidate's guards accept the arguments and falling back when a guard
//!   fails
//! - Closures, delimited continuations and GC roots are handled per thread
//!
//! # Example
//!
//! ```
//! use bytecode_system::{FrameBody, Opcode, Reg};
//! use core_types::Value;
//! use interpreter::{VmConfig, VmInstance};
//!
//! let vm = VmInstance::new(VmConfig::default()).unwrap();
//!
//! let mut body = FrameBody::new("double").with_params(1).with_registers(2);
//! body.emit(Opcode::Param { dest: Reg(0), index: 0 });
//! body.emit(Opcode::AddI { dest: Reg(1), a: Reg(0), b: Reg(0) });
//! body.emit(Opcode::Return { src: Reg(1) });
//! let double = vm.add_routine(body).unwrap();
//!
//! let mut tc = vm.attach().unwrap();
//! assert_eq!(tc.call_routine(double, &[Value::Int(21)]).unwrap(), Value::Int(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod instance;
pub mod thread;

mod closure;
mod continuation;
mod invoke;
mod roots;
mod run_loop;

// Re-export main types at crate root
pub use config::VmConfig;
pub use instance::{CoreTypes, VmInstance};
pub use thread::{GcSummary, ThreadContext};
