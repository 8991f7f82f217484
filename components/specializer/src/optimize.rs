//! Fact propagation and rewriting
//!
//! One forward pass per block tracks what is known about each register:
//! a constant value, its STable, its concreteness. Known facts fold
//! integer arithmetic, comparisons, `isconcrete`, `istype` and branches,
//! and remove guards that cannot fail. Dispatch instructions whose inline
//! cache settled on one program are replaced by that program's guards
//! followed by its outcome.
//!
//! Facts flow between blocks only for registers written once, in the
//! entry block; every other block starts from those.

use crate::graph::{SpeshGraph, SpeshIns};
use crate::spesh_log::ArgType;
use crate::routine::{Routine, SpeshHost};
use crate::stats::TupleStats;
use bytecode_system::{ArgFlag, CallsiteId, Opcode, Reg};
use core_types::{ObjRef, StableId, Value, VmResult};
use dispatch::{Outcome, Program, ProgramOp, ValueSource};
use std::sync::Arc;

/// What is known about a register.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facts {
    /// Exact value
    pub value: Option<Value>,
    /// STable of the object it holds
    pub stable: Option<StableId>,
    /// Whether that object is concrete
    pub concrete: Option<bool>,
}

impl Facts {
    fn known(value: Value) -> Self {
        Facts {
            value: Some(value),
            ..Facts::default()
        }
    }

    fn int(&self) -> Option<i64> {
        self.value.as_ref().and_then(Value::as_int)
    }
}

/// A fast invoke whose code object is known, so the callee may be inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineSite {
    /// Block holding the invoke
    pub block: usize,
    /// Index of the invoke in the block
    pub index: usize,
    /// The code object invoked
    pub code: ObjRef,
}

/// Inputs of one optimization run.
pub struct Optimizer<'a> {
    host: &'a dyn SpeshHost,
    routine: &'a Routine,
    types: Option<&'a [Option<ArgType>]>,
    tuple: Option<&'a TupleStats>,
    sites: Vec<InlineSite>,
}

enum Operand {
    Reg(Reg, ArgFlag),
    Const(Value),
}

impl<'a> Optimizer<'a> {
    /// Prepares a run for `routine` assuming argument `types`; `tuple` holds
    /// the stats gathered under those types, if any.
    pub fn new(
        host: &'a dyn SpeshHost,
        routine: &'a Routine,
        types: Option<&'a [Option<ArgType>]>,
        tuple: Option<&'a TupleStats>,
    ) -> Self {
        Optimizer {
            host,
            routine,
            types,
            tuple,
            sites: Vec::new(),
        }
    }

    /// Optimizes `graph` in place and returns the inlinable invokes.
    pub fn run(mut self, graph: &mut SpeshGraph) -> VmResult<Vec<InlineSite>> {
        let mut defs = vec![0u32; graph.num_registers as usize];
        for block in &graph.blocks {
            for ins in &block.ins {
                if let Some(r) = ins.op.defines() {
                    if let Some(count) = defs.get_mut(r.index()) {
                        *count += 1;
                    }
                }
            }
        }

        let mut entry_facts: Vec<Facts> = Vec::new();
        for b in 0..graph.blocks.len() {
            let mut facts = if b == 0 { Vec::new() } else { entry_facts.clone() };
            let old = std::mem::take(&mut graph.blocks[b].ins);
            let mut new = Vec::with_capacity(old.len());
            for ins in old {
                self.visit(graph, b, ins, &mut facts, &mut new)?;
            }
            graph.blocks[b].ins = new;
            if b == 0 {
                entry_facts = facts
                    .into_iter()
                    .enumerate()
                    .map(|(r, f)| if defs.get(r).copied().unwrap_or(0) <= 1 { f } else { Facts::default() })
                    .collect();
            }
        }
        Ok(self.sites)
    }

    fn visit(
        &mut self,
        graph: &mut SpeshGraph,
        block: usize,
        ins: SpeshIns,
        facts: &mut Vec<Facts>,
        out: &mut Vec<SpeshIns>,
    ) -> VmResult<()> {
        let orig = ins.orig;
        let keep = |op: Opcode, out: &mut Vec<SpeshIns>| out.push(SpeshIns { op, orig });
        match ins.op {
            Opcode::ConstI { dest, value } => {
                set(facts, dest, Facts::known(Value::Int(value)));
                keep(ins.op, out);
            }
            Opcode::ConstN { dest, value } => {
                set(facts, dest, Facts::known(Value::Num(value)));
                keep(ins.op, out);
            }
            Opcode::ConstS { dest, ref value } => {
                set(facts, dest, Facts::known(Value::Str(value.clone())));
                keep(ins.op, out);
            }
            Opcode::Null { dest } => {
                set(facts, dest, Facts::known(Value::Null));
                keep(ins.op, out);
            }
            Opcode::Set { dest, src } => {
                let copied = get(facts, src);
                set(facts, dest, copied);
                keep(ins.op, out);
            }
            Opcode::AddI { dest, a, b }
            | Opcode::SubI { dest, a, b }
            | Opcode::MulI { dest, a, b }
            | Opcode::LtI { dest, a, b }
            | Opcode::LeI { dest, a, b }
            | Opcode::EqI { dest, a, b } => {
                match (get(facts, a).int(), get(facts, b).int()) {
                    (Some(x), Some(y)) => {
                        let value = match ins.op {
                            Opcode::AddI { .. } => x.wrapping_add(y),
                            Opcode::SubI { .. } => x.wrapping_sub(y),
                            Opcode::MulI { .. } => x.wrapping_mul(y),
                            Opcode::LtI { .. } => i64::from(x < y),
                            Opcode::LeI { .. } => i64::from(x <= y),
                            _ => i64::from(x == y),
                        };
                        set(facts, dest, Facts::known(Value::Int(value)));
                        keep(Opcode::ConstI { dest, value }, out);
                    }
                    _ => {
                        set(facts, dest, Facts::default());
                        keep(ins.op, out);
                    }
                }
            }
            Opcode::AddN { dest, a, b } => {
                let x = get(facts, a).value.as_ref().and_then(Value::as_num);
                let y = get(facts, b).value.as_ref().and_then(Value::as_num);
                match (x, y) {
                    (Some(x), Some(y)) => {
                        set(facts, dest, Facts::known(Value::Num(x + y)));
                        keep(Opcode::ConstN { dest, value: x + y }, out);
                    }
                    _ => {
                        set(facts, dest, Facts::default());
                        keep(ins.op, out);
                    }
                }
            }
            Opcode::IfI { cond, target } | Opcode::UnlessI { cond, target } => {
                let jump_if = matches!(ins.op, Opcode::IfI { .. });
                match get(facts, cond).value {
                    Some(v) if v.is_truthy() == jump_if => keep(Opcode::Goto { target }, out),
                    Some(_) => {}
                    None => keep(ins.op, out),
                }
            }
            Opcode::IsConcrete { dest, src } => match get(facts, src).concrete {
                Some(concrete) => {
                    let value = i64::from(concrete);
                    set(facts, dest, Facts::known(Value::Int(value)));
                    keep(Opcode::ConstI { dest, value }, out);
                }
                None => {
                    set(facts, dest, Facts::default());
                    keep(ins.op, out);
                }
            },
            Opcode::IsType { dest, src, type_reg } => {
                match (get(facts, src).stable, get(facts, type_reg).stable) {
                    (Some(a), Some(b)) => {
                        let value = i64::from(a == b);
                        set(facts, dest, Facts::known(Value::Int(value)));
                        keep(Opcode::ConstI { dest, value }, out);
                    }
                    _ => {
                        set(facts, dest, Facts::default());
                        keep(ins.op, out);
                    }
                }
            }
            Opcode::Param { dest, index } => {
                let arg = self.types.and_then(|t| t.get(index as usize).copied().flatten());
                let f = arg.map_or_else(Facts::default, |a| Facts {
                    value: None,
                    stable: Some(a.ty.stable),
                    concrete: Some(a.ty.concrete),
                });
                set(facts, dest, f);
                keep(ins.op, out);
            }
            Opcode::SpGuardType { reg, stable, concrete, .. } => {
                let f = get(facts, reg);
                let proven = f.stable == Some(stable) && (concrete.is_none() || f.concrete == concrete);
                if !proven {
                    let mut f = f;
                    f.stable = Some(stable);
                    if concrete.is_some() {
                        f.concrete = concrete;
                    }
                    set(facts, reg, f);
                    keep(ins.op, out);
                }
            }
            Opcode::SpGuardLiteralInt { reg, value, .. } => {
                if get(facts, reg).int() != Some(value) {
                    set(facts, reg, Facts::known(Value::Int(value)));
                    keep(ins.op, out);
                }
            }
            Opcode::SpGuardLiteralObj { reg, slot, .. } => {
                let literal = graph.slots.get(slot as usize).cloned().unwrap_or_default();
                let already = get(facts, reg).value.is_some_and(|v| v.is_identical(&literal));
                if !already {
                    set(facts, reg, self.object_facts(literal));
                    keep(ins.op, out);
                }
            }
            Opcode::SpGetSlot { dest, slot } => {
                let value = graph.slots.get(slot as usize).cloned().unwrap_or_default();
                set(facts, dest, self.object_facts(value));
                keep(ins.op, out);
            }
            Opcode::Dispatch {
                dest,
                ref dispatcher,
                callsite,
                ref args,
                cache,
            } => {
                let rewritten = match orig {
                    Some(offset) => self.rewrite_dispatch(graph, dest, callsite, args, cache, offset)?,
                    None => None,
                };
                match rewritten {
                    Some((ops, code)) => {
                        log::trace!("rewrote dispatch '{}' at {:?} into {} ops", dispatcher, orig, ops.len());
                        for op in ops {
                            if let (Opcode::SpFastInvoke { .. }, Some(code)) = (&op, code) {
                                self.sites.push(InlineSite {
                                    block,
                                    index: out.len(),
                                    code,
                                });
                            }
                            self.visit(graph, block, SpeshIns { op, orig }, facts, out)?;
                        }
                    }
                    None => {
                        set(facts, dest, Facts::default());
                        keep(ins.op, out);
                    }
                }
            }
            op => {
                if let Some(dest) = op.defines() {
                    set(facts, dest, Facts::default());
                }
                keep(op, out);
            }
        }
        Ok(())
    }

    fn object_facts(&self, value: Value) -> Facts {
        let typed = value.as_obj().and_then(|o| self.host.type_of(o));
        Facts {
            value: Some(value),
            stable: typed.map(|t| t.0),
            concrete: typed.map(|t| t.1),
        }
    }

    fn pick_program(&self, cache: u16, offset: u32) -> Option<Arc<Program>> {
        let caches = self.routine.caches();
        let observed = self
            .tuple
            .and_then(|t| t.offsets.get(&offset))
            .and_then(|at| at.single_dispatch());
        match observed {
            Some(id) => caches.programs(cache as usize).into_iter().find(|p| p.id() == id),
            None => caches.monomorphic(cache as usize),
        }
    }

    fn rewrite_dispatch(
        &self,
        graph: &mut SpeshGraph,
        dest: Reg,
        callsite: CallsiteId,
        args: &[Reg],
        cache: u16,
        offset: u32,
    ) -> VmResult<Option<(Vec<Opcode>, Option<ObjRef>)>> {
        let Some(program) = self.pick_program(cache, offset) else {
            return Ok(None);
        };
        let Some(shape) = self.host.callsite(callsite) else {
            return Ok(None);
        };
        if program.callsite() != callsite || shape.num_pos() != args.len() {
            return Ok(None);
        }

        let slots_before = graph.slots.len();
        let registers_before = graph.num_registers;
        let result = self.translate(graph, &program, shape.flags(), dest, args, offset);
        if !matches!(result, Ok(Some(_))) {
            graph.slots.truncate(slots_before);
            graph.num_registers = registers_before;
        }
        result
    }

    fn translate(
        &self,
        graph: &mut SpeshGraph,
        program: &Program,
        flags: &[ArgFlag],
        dest: Reg,
        args: &[Reg],
        offset: u32,
    ) -> VmResult<Option<(Vec<Opcode>, Option<ObjRef>)>> {
        let num_temps = program.num_temps();
        let mut temps: Vec<Option<Operand>> = (0..num_temps).map(|_| None).collect();
        let mut literal: Vec<Option<ObjRef>> = vec![None; num_temps];
        let mut types: Vec<(Option<StableId>, Option<bool>)> = vec![(None, None); num_temps];
        let mut guards: Vec<Opcode> = Vec::new();
        let deopt = graph.deopts.len() as u32;

        let temp_reg = |temps: &[Option<Operand>], t: u16| match temps.get(t as usize) {
            Some(Some(Operand::Reg(r, _))) => Some(*r),
            _ => None,
        };

        for op in program.ops() {
            let t = op.temp() as usize;
            if t >= num_temps {
                return Ok(None);
            }
            match op {
                ProgramOp::LoadArg { arg, temp } => {
                    let (Some(reg), Some(flag)) = (args.get(*arg as usize), flags.get(*arg as usize)) else {
                        return Ok(None);
                    };
                    temps[*temp as usize] = Some(Operand::Reg(*reg, *flag));
                }
                ProgramOp::LoadConst { value, temp } => {
                    temps[*temp as usize] = Some(Operand::Const(value.clone()));
                }
                ProgramOp::GuardType { temp, stable } => {
                    if temp_reg(&temps, *temp).is_some() {
                        types[*temp as usize].0 = Some(*stable);
                    }
                }
                ProgramOp::GuardConcrete { temp } | ProgramOp::GuardTypeObject { temp } => {
                    if temp_reg(&temps, *temp).is_some() {
                        types[*temp as usize].1 = Some(matches!(op, ProgramOp::GuardConcrete { .. }));
                    }
                }
                ProgramOp::GuardLiteralInt { temp, value } => {
                    if let Some(reg) = temp_reg(&temps, *temp) {
                        guards.push(Opcode::SpGuardLiteralInt {
                            reg,
                            value: *value,
                            deopt,
                        });
                    }
                }
                ProgramOp::GuardLiteralObj { temp, obj } => {
                    literal[*temp as usize] = Some(*obj);
                    if let Some(reg) = temp_reg(&temps, *temp) {
                        let slot = graph.add_slot(Value::Obj(*obj));
                        guards.push(Opcode::SpGuardLiteralObj { reg, slot, deopt });
                    }
                }
                // Not expressible as specialized guards
                ProgramOp::GuardLiteralNum { .. }
                | ProgramOp::GuardLiteralStr { .. }
                | ProgramOp::GuardNotLiteralObj { .. }
                | ProgramOp::Decont { .. }
                | ProgramOp::TestInt { .. } => return Ok(None),
            }
        }

        for (t, (stable, concrete)) in types.iter().enumerate() {
            match (stable, temp_reg(&temps, t as u16)) {
                (Some(stable), Some(reg)) => guards.push(Opcode::SpGuardType {
                    reg,
                    stable: *stable,
                    concrete: *concrete,
                    deopt,
                }),
                (None, Some(_)) if concrete.is_some() => return Ok(None),
                _ => {}
            }
        }

        let operand = |src: &ValueSource| -> Option<Operand> {
            match src {
                ValueSource::Arg(i) => {
                    let i = *i as usize;
                    Some(Operand::Reg(*args.get(i)?, *flags.get(i)?))
                }
                ValueSource::Temp(t) => match temps.get(*t as usize)? {
                    Some(Operand::Reg(r, f)) => Some(Operand::Reg(*r, *f)),
                    Some(Operand::Const(v)) => Some(Operand::Const(v.clone())),
                    None => None,
                },
                ValueSource::Const(v) => Some(Operand::Const(v.clone())),
            }
        };

        let mut ops = guards;
        let has_guards = !ops.is_empty();
        let mut known_code = None;
        match program.outcome() {
            Outcome::Value(src) => match operand(src) {
                Some(Operand::Reg(src, _)) => ops.push(Opcode::Set { dest, src }),
                Some(Operand::Const(v)) => ops.push(const_op(graph, dest, v)),
                None => return Ok(None),
            },
            Outcome::Invoke { code, args: sources } => {
                let code_reg = match operand(code) {
                    Some(Operand::Reg(r, _)) => {
                        if let ValueSource::Temp(t) = code {
                            known_code = literal.get(*t as usize).copied().flatten();
                        }
                        r
                    }
                    Some(Operand::Const(v @ Value::Obj(obj))) => {
                        known_code = Some(obj);
                        let r = graph.new_register()?;
                        ops.push(const_op(graph, r, v));
                        r
                    }
                    _ => return Ok(None),
                };
                let mut call_args = Vec::with_capacity(sources.len());
                let mut call_flags = Vec::with_capacity(sources.len());
                for src in sources.iter() {
                    match operand(src) {
                        Some(Operand::Reg(r, f)) => {
                            call_args.push(r);
                            call_flags.push(f);
                        }
                        Some(Operand::Const(v)) => {
                            let r = graph.new_register()?;
                            call_flags.push(ArgFlag::of(&v));
                            ops.push(const_op(graph, r, v));
                            call_args.push(r);
                        }
                        None => return Ok(None),
                    }
                }
                ops.push(Opcode::SpFastInvoke {
                    dest,
                    code: code_reg,
                    callsite: self.host.intern_callsite(&call_flags),
                    args: call_args.into_boxed_slice(),
                });
            }
        }
        if has_guards {
            graph.add_deopt(offset);
        }
        Ok(Some((ops, known_code)))
    }
}

fn const_op(graph: &mut SpeshGraph, dest: Reg, value: Value) -> Opcode {
    match value {
        Value::Int(value) => Opcode::ConstI { dest, value },
        Value::Num(value) => Opcode::ConstN { dest, value },
        Value::Str(value) => Opcode::ConstS { dest, value },
        Value::Null => Opcode::Null { dest },
        obj @ Value::Obj(_) => Opcode::SpGetSlot {
            dest,
            slot: graph.add_slot(obj),
        },
    }
}

fn get(facts: &[Facts], reg: Reg) -> Facts {
    facts.get(reg.index()).cloned().unwrap_or_default()
}

fn set(facts: &mut Vec<Facts>, reg: Reg, f: Facts) {
    if facts.len() <= reg.index() {
        facts.resize(reg.index() + 1, Facts::default());
    }
    facts[reg.index()] = f;
}
