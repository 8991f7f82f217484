//! Inlining of small callees
//!
//! A fast invoke whose code object is known can be replaced by the
//! callee's body: callee registers are appended to the caller's, `param`
//! becomes a copy from the argument register and each return becomes a
//! copy into the invoke's destination followed by a jump past the call.
//!
//! Only callees without deopt points are inlined, so a deopt in the
//! result always lands in the caller's own instructions.

use crate::candidate::InlineRecord;
use crate::graph::{BasicBlock, SpeshGraph, SpeshIns};
use crate::optimize::InlineSite;
use crate::routine::SpeshHost;
use bytecode_system::{FrameBody, Opcode, Reg};
use core_types::{StaticFrameId, VmResult};

/// Why a callee was not inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InliningRejection {
    /// Callee is too large
    TooLarge {
        /// Callee size in instructions
        size: usize,
        /// Largest inlinable size
        max: usize,
    },
    /// The callee is the routine being specialized
    RecursiveCall,
    /// Code object has no known routine
    UnknownCallee,
    /// Callee contains an operation that needs its own frame
    NeedsFrame(&'static str),
    /// Callee reads a parameter the call does not pass
    ArityMismatch {
        /// Parameter index
        index: u16,
        /// Arguments passed
        passed: usize,
    },
    /// Caller would run out of registers
    TooManyRegisters,
}

/// Checks whether `body` can be inlined at a call passing `passed` args.
pub fn check_inlinable(body: &FrameBody, passed: usize, max_size: usize) -> Result<(), InliningRejection> {
    if body.len() > max_size {
        return Err(InliningRejection::TooLarge {
            size: body.len(),
            max: max_size,
        });
    }
    for inst in &body.instructions {
        let needs = match &inst.opcode {
            op if op.is_invoke() => Some("invoke"),
            op if op.is_guard() => Some("guard"),
            Opcode::GetLex { .. } | Opcode::BindLex { .. } => Some("lexical access"),
            Opcode::TakeClosure { .. } => Some("closure capture"),
            Opcode::SpGetSlot { .. } => Some("spesh slot"),
            Opcode::Param { index, .. } if *index as usize >= passed => {
                return Err(InliningRejection::ArityMismatch {
                    index: *index,
                    passed,
                })
            }
            _ => None,
        };
        if let Some(what) = needs {
            return Err(InliningRejection::NeedsFrame(what));
        }
    }
    Ok(())
}

/// Inlines what it can among `sites`; returns a record per inlined callee.
pub fn inline_sites(
    graph: &mut SpeshGraph,
    mut sites: Vec<InlineSite>,
    host: &dyn SpeshHost,
    caller: StaticFrameId,
    max_size: usize,
) -> VmResult<Vec<InlineRecord>> {
    // Splitting a block keeps the indices of earlier instructions valid
    sites.sort_by(|a, b| (b.block, b.index).cmp(&(a.block, a.index)));
    let mut records = Vec::new();
    for site in sites {
        match inline_one(graph, site, host, caller, max_size)? {
            Ok(record) => records.push(record),
            Err(rejection) => log::trace!("not inlining {:?}: {:?}", site.code, rejection),
        }
    }
    Ok(records)
}

fn inline_one(
    graph: &mut SpeshGraph,
    site: InlineSite,
    host: &dyn SpeshHost,
    caller: StaticFrameId,
    max_size: usize,
) -> VmResult<Result<InlineRecord, InliningRejection>> {
    let Some(call) = graph.blocks.get(site.block).and_then(|b| b.ins.get(site.index)).cloned() else {
        return Ok(Err(InliningRejection::UnknownCallee));
    };
    let Opcode::SpFastInvoke { dest, ref args, .. } = call.op else {
        return Ok(Err(InliningRejection::UnknownCallee));
    };
    let Some(callee_id) = host.code_routine(site.code) else {
        return Ok(Err(InliningRejection::UnknownCallee));
    };
    if callee_id == caller {
        return Ok(Err(InliningRejection::RecursiveCall));
    }
    let Some(callee) = host.routine(callee_id) else {
        return Ok(Err(InliningRejection::UnknownCallee));
    };
    if let Err(rejection) = check_inlinable(callee.body(), args.len(), max_size) {
        return Ok(Err(rejection));
    }
    let base = graph.num_registers;
    let Some(total) = base.checked_add(callee.body().num_registers) else {
        return Ok(Err(InliningRejection::TooManyRegisters));
    };

    let inlined = SpeshGraph::from_body(callee.body())?;
    let first = graph.blocks.len();
    let cont = first + inlined.blocks.len();
    let shift = |r: Reg| Reg(r.0 + base);

    let mut blocks = Vec::with_capacity(inlined.blocks.len() + 1);
    for block in inlined.blocks {
        let mut ins = Vec::with_capacity(block.ins.len() + 1);
        for i in block.ins {
            let mut op = i.op;
            match op {
                Opcode::Param { dest: p, index } => {
                    ins.push(SpeshIns {
                        op: Opcode::Set {
                            dest: shift(p),
                            src: args[index as usize],
                        },
                        orig: None,
                    });
                }
                Opcode::Return { src } => {
                    ins.push(SpeshIns {
                        op: Opcode::Set { dest, src: shift(src) },
                        orig: None,
                    });
                    ins.push(SpeshIns {
                        op: Opcode::Goto { target: cont as u32 },
                        orig: None,
                    });
                }
                Opcode::ReturnVoid => {
                    ins.push(SpeshIns {
                        op: Opcode::Null { dest },
                        orig: None,
                    });
                    ins.push(SpeshIns {
                        op: Opcode::Goto { target: cont as u32 },
                        orig: None,
                    });
                }
                _ => {
                    op.map_registers(&shift);
                    if let Some(target) = op.branch_target() {
                        op.set_branch_target(target + first as u32);
                    }
                    ins.push(SpeshIns { op, orig: None });
                }
            }
        }
        blocks.push(BasicBlock {
            ins,
            fallthrough: block.fallthrough.map(|f| f + first),
        });
    }

    let host_block = &mut graph.blocks[site.block];
    let tail = host_block.ins.split_off(site.index + 1);
    host_block.ins.pop();
    let after = host_block.fallthrough.replace(first);
    blocks.push(BasicBlock {
        ins: tail,
        fallthrough: after,
    });
    graph.blocks.extend(blocks);
    graph.num_registers = total;

    log::debug!("inlined {:?} at {:?}", callee_id, call.orig);
    Ok(Ok(InlineRecord {
        routine: callee_id,
        call_offset: call.orig.unwrap_or(u32::MAX),
    }))
}
