//! Frame bodies - validated instruction streams plus frame descriptors
//!
//! A [`FrameBody`] is what the loader hands the core: the instructions of a
//! routine and the layout the interpreter needs to run them (register,
//! lexical, parameter and inline-cache counts, and the lexical outer).

use crate::instruction::Instruction;
use crate::opcode::{Opcode, Reg};
use crate::callsite::CallsiteId;
use core_types::{ErrorKind, StaticFrameId, VmError, VmResult};
use std::sync::Arc;

/// Instructions and layout of one routine.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBody {
    /// Routine name, for diagnostics
    pub name: String,
    /// The instruction stream
    pub instructions: Vec<Instruction>,
    /// Number of work registers
    pub num_registers: u16,
    /// Number of lexical slots
    pub num_lexicals: u16,
    /// Number of positional parameters
    pub num_params: u16,
    /// Number of dispatch inline-cache slots
    pub num_cache_slots: u16,
    /// Static lexical outer, if the routine is nested
    pub outer: Option<StaticFrameId>,
}

impl FrameBody {
    /// Create an empty body
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instructions: Vec::new(),
            num_registers: 0,
            num_lexicals: 0,
            num_params: 0,
            num_cache_slots: 0,
            outer: None,
        }
    }

    /// Set the register count
    pub fn with_registers(mut self, n: u16) -> Self {
        self.num_registers = n;
        self
    }

    /// Set the parameter count
    pub fn with_params(mut self, n: u16) -> Self {
        self.num_params = n;
        self
    }

    /// Set the lexical count
    pub fn with_lexicals(mut self, n: u16) -> Self {
        self.num_lexicals = n;
        self
    }

    /// Set the static outer
    pub fn with_outer(mut self, outer: StaticFrameId) -> Self {
        self.outer = Some(outer);
        self
    }

    /// Emit an instruction and return its index
    pub fn emit(&mut self, opcode: Opcode) -> u32 {
        let idx = self.instructions.len() as u32;
        self.instructions.push(Instruction::new(opcode));
        idx
    }

    /// Emit a dispatch, allocating a fresh inline-cache slot for it
    pub fn emit_dispatch(&mut self, dest: Reg, dispatcher: &str, callsite: CallsiteId, args: &[Reg]) -> u32 {
        let cache = self.num_cache_slots;
        self.num_cache_slots += 1;
        self.emit(Opcode::Dispatch {
            dest,
            dispatcher: Arc::from(dispatcher),
            callsite,
            args: args.into(),
            cache,
        })
    }

    /// Point the jump at `at` to `target`
    pub fn patch_target(&mut self, at: u32, target: u32) {
        if let Some(inst) = self.instructions.get_mut(at as usize) {
            inst.opcode.set_branch_target(target);
        }
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if there are no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Check the body before it is run.
    ///
    /// Registers, branch targets, parameters, lexicals and cache slots must
    /// be in range, and control must not run off the end.
    pub fn validate(&self) -> VmResult<()> {
        let fail = |at: usize, what: String| {
            Err(VmError::adhoc(
                ErrorKind::Bytecode,
                format!("{} at instruction {} of '{}'", what, at, self.name),
            ))
        };
        let len = self.instructions.len();
        if len == 0 {
            return fail(0, "empty frame body".to_string());
        }
        for (at, inst) in self.instructions.iter().enumerate() {
            let op = &inst.opcode;
            let regs = op.uses().into_iter().chain(op.defines());
            for reg in regs {
                if reg.0 >= self.num_registers {
                    return fail(at, format!("register {} out of range", reg.0));
                }
            }
            if let Some(target) = op.branch_target() {
                if target as usize >= len {
                    return fail(at, format!("branch target {} out of range", target));
                }
            }
            match op {
                Opcode::Param { index, .. } if *index >= self.num_params => {
                    return fail(at, format!("parameter {} out of range", index));
                }
                Opcode::GetLex { outers: 0, index, .. } | Opcode::BindLex { outers: 0, index, .. }
                    if *index >= self.num_lexicals =>
                {
                    return fail(at, format!("lexical {} out of range", index));
                }
                Opcode::Dispatch { cache, .. } if *cache >= self.num_cache_slots => {
                    return fail(at, format!("cache slot {} out of range", cache));
                }
                _ => {}
            }
        }
        if let Some(last) = self.instructions.last() {
            if !last.opcode.ends_flow() {
                return fail(len - 1, "control falls off the end".to_string());
            }
        }
        Ok(())
    }
}
