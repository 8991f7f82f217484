//! Bytecode instruction representation
//!
//! An instruction is an opcode plus optional debug annotations.

use crate::opcode::Opcode;

/// A single bytecode instruction with optional line mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation
    pub opcode: Opcode,
    /// Source line, for diagnostics
    pub line: Option<u32>,
}

impl Instruction {
    /// Create a new instruction without a line
    pub fn new(opcode: Opcode) -> Self {
        Self { opcode, line: None }
    }

    /// Create a new instruction annotated with a source line
    pub fn with_line(opcode: Opcode, line: u32) -> Self {
        Self {
            opcode,
            line: Some(line),
        }
    }
}

impl From<Opcode> for Instruction {
    fn from(opcode: Opcode) -> Self {
        Instruction::new(opcode)
    }
}
