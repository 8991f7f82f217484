//! Spesh graph
//!
//! A routine's instructions split into basic blocks. Inside the graph,
//! branch targets are block indices rather than instruction offsets, so
//! passes can insert, remove and replace instructions freely; emission
//! lays the reachable blocks out again and patches the targets.

use bytecode_system::{FrameBody, Instruction, Opcode};
use core_types::{ErrorKind, Value, VmError, VmResult};
use std::collections::BTreeSet;

/// An instruction in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeshIns {
    /// The operation; branch targets are block indices
    pub op: Opcode,
    /// Offset in the original instructions, if it came from there
    pub orig: Option<u32>,
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicBlock {
    /// Instructions; only the last may branch
    pub ins: Vec<SpeshIns>,
    /// Block reached by falling off the end
    pub fallthrough: Option<usize>,
}

impl BasicBlock {
    /// Blocks control can move to from this one.
    pub fn successors(&self) -> Vec<usize> {
        let last = self.ins.last().map(|i| &i.op);
        let mut succ = Vec::with_capacity(2);
        if let Some(target) = last.and_then(Opcode::branch_target) {
            succ.push(target as usize);
        }
        if !last.is_some_and(Opcode::ends_flow) {
            if let Some(next) = self.fallthrough {
                succ.push(next);
            }
        }
        succ
    }
}

/// The graph being specialized.
#[derive(Debug, Clone)]
pub struct SpeshGraph {
    /// Blocks; block 0 is the entry
    pub blocks: Vec<BasicBlock>,
    /// Work registers
    pub num_registers: u16,
    /// Spesh slots
    pub slots: Vec<Value>,
    /// Deopt index to original offset
    pub deopts: Vec<u32>,
}

impl SpeshGraph {
    /// Splits a validated body into blocks.
    pub fn from_body(body: &FrameBody) -> VmResult<SpeshGraph> {
        let instructions = &body.instructions;
        let len = instructions.len();
        if len == 0 {
            return Err(VmError::adhoc(ErrorKind::Bytecode, format!("'{}' has no instructions", body.name)));
        }
        let mut leaders = BTreeSet::new();
        leaders.insert(0usize);
        for (at, inst) in instructions.iter().enumerate() {
            if let Some(target) = inst.opcode.branch_target() {
                leaders.insert(target as usize);
                leaders.insert(at + 1);
            } else if inst.opcode.ends_flow() {
                leaders.insert(at + 1);
            }
        }
        leaders.retain(|&l| l < len);
        let starts: Vec<usize> = leaders.into_iter().collect();
        let block_of = |offset: usize| starts.partition_point(|&s| s <= offset) - 1;

        let mut blocks = Vec::with_capacity(starts.len());
        for (b, &start) in starts.iter().enumerate() {
            let end = starts.get(b + 1).copied().unwrap_or(len);
            let ins = instructions[start..end]
                .iter()
                .enumerate()
                .map(|(i, inst)| {
                    let mut op = inst.opcode.clone();
                    if let Some(target) = op.branch_target() {
                        op.set_branch_target(block_of(target as usize) as u32);
                    }
                    SpeshIns {
                        op,
                        orig: Some((start + i) as u32),
                    }
                })
                .collect();
            blocks.push(BasicBlock {
                ins,
                fallthrough: (end < len).then_some(b + 1),
            });
        }

        Ok(SpeshGraph {
            blocks,
            num_registers: body.num_registers,
            slots: Vec::new(),
            deopts: Vec::new(),
        })
    }

    /// Adds a spesh slot holding `value`, reusing an identical one.
    pub fn add_slot(&mut self, value: Value) -> u16 {
        if let Some(i) = self.slots.iter().position(|v| v.is_identical(&value)) {
            return i as u16;
        }
        self.slots.push(value);
        (self.slots.len() - 1) as u16
    }

    /// Adds a deopt point resuming at original offset `offset`.
    pub fn add_deopt(&mut self, offset: u32) -> u32 {
        self.deopts.push(offset);
        (self.deopts.len() - 1) as u32
    }

    /// Allocates a fresh work register.
    pub fn new_register(&mut self) -> VmResult<bytecode_system::Reg> {
        let reg = self.num_registers;
        self.num_registers = reg.checked_add(1).ok_or_else(|| {
            VmError::adhoc(ErrorKind::Bytecode, "specialization needs too many registers")
        })?;
        Ok(bytecode_system::Reg(reg))
    }

    /// Blocks reachable from the entry, in index order.
    pub fn reachable(&self) -> Vec<usize> {
        let mut seen = vec![false; self.blocks.len()];
        let mut work = vec![0usize];
        while let Some(b) = work.pop() {
            if b >= seen.len() || seen[b] {
                continue;
            }
            seen[b] = true;
            work.extend(self.blocks[b].successors());
        }
        (0..self.blocks.len()).filter(|&b| seen[b]).collect()
    }

    /// Lays the reachable blocks out as linear instructions.
    pub fn emit(&self) -> Vec<Instruction> {
        let layout = self.reachable();
        let mut out: Vec<Opcode> = Vec::new();
        let mut start = vec![0u32; self.blocks.len()];
        let mut patches: Vec<(usize, usize)> = Vec::new();

        for (pos, &b) in layout.iter().enumerate() {
            start[b] = out.len() as u32;
            let block = &self.blocks[b];
            for ins in &block.ins {
                if let Some(target) = ins.op.branch_target() {
                    patches.push((out.len(), target as usize));
                }
                out.push(ins.op.clone());
            }
            let ends = block.ins.last().is_some_and(|i| i.op.ends_flow());
            if !ends {
                if let Some(next) = block.fallthrough {
                    if layout.get(pos + 1) != Some(&next) {
                        patches.push((out.len(), next));
                        out.push(Opcode::Goto { target: 0 });
                    }
                }
            }
        }
        for (at, block) in patches {
            out[at].set_branch_target(start[block]);
        }
        out.into_iter().map(Instruction::new).collect()
    }
}
