//! Bytecode system for the VM
//!
//! This crate provides the instruction set the core consumes and the
//! descriptors that come with it. Loading bytecode from disk is not part of
//! the core; a loader produces [`FrameBody`] values and interns callsites.
//!
//! # Features
//!
//! - Register-based instruction set, including specializer-only opcodes
//! - Frame bodies with register/lexical/parameter layout and validation
//! - Callsite shapes with a concurrent intern table
//!
//! # Example
//!
//! ```
//! use bytecode_system::{ArgFlag, CallsiteInterner, FrameBody, Opcode, Reg};
//!
//! let callsites = CallsiteInterner::new();
//! let cs = callsites.intern(&[ArgFlag::Int, ArgFlag::Int]);
//!
//! let mut body = FrameBody::new("main").with_registers(3);
//! body.emit(Opcode::ConstI { dest: Reg(0), value: 2 });
//! body.emit(Opcode::ConstI { dest: Reg(1), value: 3 });
//! body.emit_dispatch(Reg(2), "plus", cs, &[Reg(0), Reg(1)]);
//! body.emit(Opcode::Return { src: Reg(2) });
//!
//! assert!(body.validate().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callsite;
pub mod frame;
pub mod instruction;
pub mod opcode;

// Re-export main types at crate root
pub use callsite::{ArgFlag, Callsite, CallsiteId, CallsiteInterner};
pub use frame::FrameBody;
pub use instruction::Instruction;
pub use opcode::{Opcode, Reg};
