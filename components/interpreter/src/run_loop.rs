//! The interpreter loop
//!
//! Runs the instruction at the current frame's program counter, polling for
//! collection rounds between instructions. Frames are addressed by
//! `RecordRef` rather than borrowed, since most operations re-enter the
//! thread context (invocation, continuation capture, collection).

use crate::invoke::observe;
use crate::thread::ThreadContext;
use bytecode_system::{CallsiteId, Opcode, Reg};
use callstack::{FrameState, RecordRef, ReturnTarget};
use core_types::{ErrorKind, ObjRef, ObjectInspector, StableId, ThreadId, Value, VmError, VmResult};
use dispatch::{Capture, DispatchOutcome};
use memory_manager::{CollectionKind, Heap};
use specializer::{deoptimize, DeoptReason, LogEntry};
use std::sync::Arc;

/// What the loop does after an instruction.
pub(crate) enum Flow {
    /// Run the next instruction of whatever frame is current
    Next,
    /// The current frame returns this value
    Return(Value),
}

fn lost_frame() -> VmError {
    VmError::adhoc(ErrorKind::Bytecode, "Frame is no longer on the call stack")
}

impl ThreadContext {
    /// Runs until the frame the host invoked returns.
    pub(crate) fn run(&mut self) -> VmResult<Value> {
        loop {
            self.safepoint();
            if let Some(kind) = self.gc_wanted {
                self.collect(kind);
            }
            let at = self
                .stack
                .current_frame()
                .ok_or_else(|| VmError::adhoc(ErrorKind::Bytecode, "No frame to run"))?;
            let (bytecode, pc, correlation) = {
                let state = self.state_mut(at)?;
                let pc = state.pc;
                state.pc += 1;
                (Arc::clone(&state.bytecode), pc, state.correlation)
            };
            let Some(ins) = bytecode.get(pc as usize) else {
                return Err(VmError::adhoc(
                    ErrorKind::Bytecode,
                    format!("Ran off the end of the instructions at offset {}", pc),
                ));
            };
            if let Flow::Return(value) = self.step(at, &ins.opcode, pc, correlation)? {
                if let Some(result) = self.return_value(value)? {
                    return Ok(result);
                }
            }
        }
    }

    fn step(&mut self, at: RecordRef, op: &Opcode, pc: u32, correlation: u32) -> VmResult<Flow> {
        use Opcode::*;
        match op {
            Noop | Safepoint => {}

            // ========== Constants and registers ==========
            ConstI { dest, value } => self.set_reg(at, *dest, Value::Int(*value))?,
            ConstN { dest, value } => self.set_reg(at, *dest, Value::Num(*value))?,
            ConstS { dest, value } => self.set_reg(at, *dest, Value::Str(Arc::clone(value)))?,
            Null { dest } => self.set_reg(at, *dest, Value::Null)?,
            Set { dest, src } => {
                let value = self.reg(at, *src)?;
                self.set_reg(at, *dest, value)?;
            }

            // ========== Arithmetic ==========
            AddI { dest, a, b } => self.int_op(at, *dest, *a, *b, "add_i", i64::wrapping_add)?,
            SubI { dest, a, b } => self.int_op(at, *dest, *a, *b, "sub_i", i64::wrapping_sub)?,
            MulI { dest, a, b } => self.int_op(at, *dest, *a, *b, "mul_i", i64::wrapping_mul)?,
            LtI { dest, a, b } => self.int_op(at, *dest, *a, *b, "lt_i", |x, y| (x < y) as i64)?,
            LeI { dest, a, b } => self.int_op(at, *dest, *a, *b, "le_i", |x, y| (x <= y) as i64)?,
            EqI { dest, a, b } => self.int_op(at, *dest, *a, *b, "eq_i", |x, y| (x == y) as i64)?,
            AddN { dest, a, b } => {
                let sum = self.num(at, *a, "add_n")? + self.num(at, *b, "add_n")?;
                self.set_reg(at, *dest, Value::Num(sum))?;
            }

            // ========== Control flow ==========
            Goto { target } => self.jump(at, *target)?,
            IfI { cond, target } => {
                if self.reg(at, *cond)?.is_truthy() {
                    self.jump(at, *target)?;
                }
            }
            UnlessI { cond, target } => {
                if !self.reg(at, *cond)?.is_truthy() {
                    self.jump(at, *target)?;
                }
            }
            Param { dest, index } => {
                let value = self.state(at)?.args.get(*index as usize).cloned().ok_or_else(|| {
                    VmError::adhoc(ErrorKind::Arity, format!("No positional argument {}", index))
                })?;
                self.set_reg(at, *dest, value)?;
            }
            Return { src } => return Ok(Flow::Return(self.reg(at, *src)?)),
            ReturnVoid => return Ok(Flow::Return(Value::Null)),

            // ========== Lexicals and closures ==========
            GetLex { dest, outers, index } => {
                let value = self.get_lex(at, *outers, *index)?;
                self.set_reg(at, *dest, value)?;
            }
            BindLex { outers, index, src } => {
                let value = self.reg(at, *src)?;
                self.bind_lex(at, *outers, *index, value)?;
            }
            GetCode { dest, frame } => {
                let code = self.shared.static_code(*frame)?;
                self.set_reg(at, *dest, Value::Obj(code))?;
            }
            TakeClosure { dest, src } => {
                let code = self.obj(at, *src, "takeclosure")?;
                let closure = self.take_closure(at, code)?;
                self.set_reg(at, *dest, Value::Obj(closure))?;
            }

            // ========== Dispatch ==========
            Dispatch {
                dest,
                dispatcher,
                callsite,
                args,
                cache,
            } => self.dispatch(at, pc, correlation, *dest, dispatcher, *callsite, args, *cache)?,

            // ========== Objects ==========
            Create { dest, type_reg } => {
                let ty = self.obj(at, *type_reg, "create")?;
                let obj = self.allocating(|heap, tc| {
                    let st = heap.stable(ty);
                    heap.create(tc, &st)
                })?;
                self.set_reg(at, *dest, Value::Obj(obj))?;
            }
            BoxI { dest, src, type_reg } => {
                let value = Value::Int(self.int(at, *src, "box_i")?);
                self.box_into(at, *dest, *type_reg, value)?;
            }
            BoxN { dest, src, type_reg } => {
                let value = Value::Num(self.num(at, *src, "box_n")?);
                self.box_into(at, *dest, *type_reg, value)?;
            }
            BoxS { dest, src, type_reg } => {
                let value = match self.reg(at, *src)? {
                    s @ Value::Str(_) => s,
                    other => return Err(VmError::type_check(format!("box_s needs a str, got {:?}", other.kind()))),
                };
                self.box_into(at, *dest, *type_reg, value)?;
            }
            UnboxI { dest, src } => {
                let obj = self.obj(at, *src, "unbox_i")?;
                let value = self.shared.heap.unbox_int(obj)?;
                self.set_reg(at, *dest, Value::Int(value))?;
            }
            UnboxN { dest, src } => {
                let obj = self.obj(at, *src, "unbox_n")?;
                let value = self.shared.heap.unbox_num(obj)?;
                self.set_reg(at, *dest, Value::Num(value))?;
            }
            UnboxS { dest, src } => {
                let obj = self.obj(at, *src, "unbox_s")?;
                let value = self.shared.heap.unbox_str(obj)?;
                self.set_reg(at, *dest, Value::Str(value))?;
            }
            Decont { dest, src } => {
                let value = match self.reg(at, *src)? {
                    Value::Obj(obj) => self.shared.heap.decont(obj),
                    other => other,
                };
                self.log_type(correlation, pc, &value);
                self.set_reg(at, *dest, value)?;
            }
            Assign { container, src } => {
                let container = self.obj(at, *container, "assign")?;
                let value = self.reg(at, *src)?;
                self.allocating(|heap, tc| heap.assign(tc, container, value))?;
            }
            IsConcrete { dest, src } => {
                let concrete = match self.reg(at, *src)? {
                    Value::Obj(obj) => self.shared.heap.is_concrete(obj),
                    Value::Null => false,
                    _ => true,
                };
                self.set_reg(at, *dest, Value::Int(concrete as i64))?;
            }
            IsType { dest, src, type_reg } => {
                let ty = self.obj(at, *type_reg, "istype")?;
                let matches = match self.reg(at, *src)? {
                    Value::Obj(obj) => {
                        let heap = &self.shared.heap;
                        heap.stable_of(obj) == heap.stable_of(ty)
                    }
                    _ => false,
                };
                self.set_reg(at, *dest, Value::Int(matches as i64))?;
            }
            GetAttr { dest, obj, slot } => {
                let obj = self.obj(at, *obj, "getattr")?;
                let value = self.shared.heap.get_attribute(obj, *slot as usize)?;
                self.log_type(correlation, pc, &value);
                self.set_reg(at, *dest, value)?;
            }
            BindAttr { obj, slot, src } => {
                let obj = self.obj(at, *obj, "bindattr")?;
                let value = self.reg(at, *src)?;
                self.allocating(|heap, tc| heap.bind_attribute(tc, obj, *slot as usize, value))?;
            }
            Push { array, src } => {
                let array = self.obj(at, *array, "push")?;
                let value = self.reg(at, *src)?;
                self.allocating(|heap, tc| heap.array_push(tc, array, value))?;
            }
            AtPos { dest, array, index } => {
                let array = self.obj(at, *array, "atpos")?;
                let index = self.int(at, *index, "atpos")?;
                let value = self.shared.heap.array_at(array, index)?;
                self.log_type(correlation, pc, &value);
                self.set_reg(at, *dest, value)?;
            }
            BindPos { array, index, src } => {
                let array = self.obj(at, *array, "bindpos")?;
                let index = self.int(at, *index, "bindpos")?;
                let value = self.reg(at, *src)?;
                self.allocating(|heap, tc| heap.array_bind(tc, array, index, value))?;
            }
            Elems { dest, array } => {
                let array = self.obj(at, *array, "elems")?;
                let elems = self.shared.heap.array_elems(array)?;
                self.set_reg(at, *dest, Value::Int(elems))?;
            }
            Clone { dest, src } | ContinuationClone { dest, src } => {
                let obj = self.obj(at, *src, "clone")?;
                let copy = self.allocating(|heap, tc| heap.clone_object(tc, obj))?;
                self.set_reg(at, *dest, Value::Obj(copy))?;
            }

            // ========== Continuations ==========
            Reset { dest, tag, code } => {
                let tag = self.reg(at, *tag)?;
                let code = self.obj(at, *code, "continuationreset")?;
                self.reset(*dest, tag, code)?;
            }
            Control {
                dest,
                protect,
                tag,
                code,
            } => {
                let tag = self.reg(at, *tag)?;
                let code = self.obj(at, *code, "continuationcontrol")?;
                self.control(*dest, *protect, tag, code)?;
            }
            ContinuationInvoke { dest, cont, value } => {
                let cont = self.obj(at, *cont, "continuationinvoke")?;
                let value = self.reg(at, *value)?;
                self.resume(*dest, cont, value)?;
            }

            // ========== GC ==========
            CollectGarbage { full } => {
                let kind = if *full { CollectionKind::Full } else { CollectionKind::Minor };
                self.collect(kind);
            }

            // ========== Specialized code ==========
            SpGuardType {
                reg,
                stable,
                concrete,
                deopt,
            } => {
                let value = self.reg(at, *reg)?;
                if !self.has_type(&value, *stable, *concrete) {
                    self.deopt(at, *deopt, DeoptReason::TypeGuardFailure)?;
                }
            }
            SpGuardLiteralInt { reg, value, deopt } => {
                if self.reg(at, *reg)?.as_int() != Some(*value) {
                    self.deopt(at, *deopt, DeoptReason::LiteralGuardFailure)?;
                }
            }
            SpGuardLiteralObj { reg, slot, deopt } => {
                let expected = self.spesh_slot(at, *slot)?;
                if !self.reg(at, *reg)?.is_identical(&expected) {
                    self.deopt(at, *deopt, DeoptReason::LiteralGuardFailure)?;
                }
            }
            SpGetSlot { dest, slot } => {
                let value = self.spesh_slot(at, *slot)?;
                self.set_reg(at, *dest, value)?;
            }
            SpFastInvoke {
                dest,
                code,
                callsite,
                args,
            } => {
                let code = self.obj(at, *code, "invoke")?;
                let args = self.regs(at, args)?;
                self.log_invoke(correlation, pc, code);
                self.invoke(code, args, Some(*callsite), ReturnTarget::Register(*dest))?;
            }
        }
        Ok(Flow::Next)
    }

    // ========== Registers ==========

    fn state(&self, at: RecordRef) -> VmResult<&FrameState> {
        self.stack.frame_state(at).ok_or_else(lost_frame)
    }

    fn state_mut(&mut self, at: RecordRef) -> VmResult<&mut FrameState> {
        self.stack.frame_state_mut(at).ok_or_else(lost_frame)
    }

    pub(crate) fn reg(&self, at: RecordRef, reg: Reg) -> VmResult<Value> {
        self.state(at)?
            .work
            .get(reg.index())
            .cloned()
            .ok_or_else(|| VmError::adhoc(ErrorKind::Bytecode, format!("No register r{}", reg.index())))
    }

    pub(crate) fn set_reg(&mut self, at: RecordRef, reg: Reg, value: Value) -> VmResult<()> {
        let slot = self
            .state_mut(at)?
            .work
            .get_mut(reg.index())
            .ok_or_else(|| VmError::adhoc(ErrorKind::Bytecode, format!("No register r{}", reg.index())))?;
        *slot = value;
        Ok(())
    }

    fn regs(&self, at: RecordRef, regs: &[Reg]) -> VmResult<Vec<Value>> {
        regs.iter().map(|r| self.reg(at, *r)).collect()
    }

    fn int(&self, at: RecordRef, reg: Reg, op: &str) -> VmResult<i64> {
        match self.reg(at, reg)? {
            Value::Int(i) => Ok(i),
            other => Err(VmError::type_check(format!("{} needs an int, got {:?}", op, other.kind()))),
        }
    }

    fn num(&self, at: RecordRef, reg: Reg, op: &str) -> VmResult<f64> {
        match self.reg(at, reg)? {
            Value::Num(n) => Ok(n),
            Value::Int(i) => Ok(i as f64),
            other => Err(VmError::type_check(format!("{} needs a num, got {:?}", op, other.kind()))),
        }
    }

    fn obj(&self, at: RecordRef, reg: Reg, op: &str) -> VmResult<ObjRef> {
        match self.reg(at, reg)? {
            Value::Obj(obj) => Ok(obj),
            other => Err(VmError::type_check(format!("{} needs an object, got {:?}", op, other.kind()))),
        }
    }

    fn int_op(&mut self, at: RecordRef, dest: Reg, a: Reg, b: Reg, op: &str, f: fn(i64, i64) -> i64) -> VmResult<()> {
        let result = f(self.int(at, a, op)?, self.int(at, b, op)?);
        self.set_reg(at, dest, Value::Int(result))
    }

    fn jump(&mut self, at: RecordRef, target: u32) -> VmResult<()> {
        self.state_mut(at)?.pc = target;
        Ok(())
    }

    // ========== Heap access ==========

    /// Runs a heap operation that may allocate, then notes whether the
    /// nursery wants a collection.
    fn allocating<R>(&mut self, f: impl FnOnce(&Heap, ThreadId) -> VmResult<R>) -> VmResult<R> {
        let shared = Arc::clone(&self.shared);
        let tc = self.id();
        let result = f(&shared.heap, tc);
        self.check_nursery(shared.heap.wants_collection(tc));
        result
    }

    fn box_into(&mut self, at: RecordRef, dest: Reg, type_reg: Reg, value: Value) -> VmResult<()> {
        let ty = self.obj(at, type_reg, "box")?;
        let boxed = self.allocating(|heap, tc| {
            let st = heap.stable(ty);
            heap.box_value(tc, &st, value)
        })?;
        self.set_reg(at, dest, Value::Obj(boxed))
    }

    fn has_type(&self, value: &Value, stable: StableId, concrete: Option<bool>) -> bool {
        let Value::Obj(obj) = value else { return false };
        let heap = &self.shared.heap;
        heap.stable_of(*obj) == Some(stable) && concrete.map_or(true, |c| heap.is_concrete(*obj) == c)
    }

    // ========== Dispatch ==========

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        at: RecordRef,
        pc: u32,
        correlation: u32,
        dest: Reg,
        dispatcher: &str,
        callsite: CallsiteId,
        args: &[Reg],
        cache: u16,
    ) -> VmResult<()> {
        let args = self.regs(at, args)?;
        let routine = self.shared.routine(self.state(at)?.static_frame)?;
        let shared = Arc::clone(&self.shared);
        let capture = Capture {
            dispatcher,
            callsite,
            args: &args,
        };
        // No heap lock is held here; resolvers may re-enter the instance
        let dispatched = routine
            .caches()
            .dispatch(cache as usize, &shared.dispatchers, &capture, &shared.heap, &mut self.temps)?;
        if !dispatched.hit {
            log::trace!("{} missed its inline cache at {} slot {}", routine.body().name, pc, cache);
        }
        self.log(correlation, |c| LogEntry::Dispatch {
            correlation: c,
            offset: pc,
            program: dispatched.program,
        });
        match dispatched.outcome {
            DispatchOutcome::Value(value) => {
                self.log_type(correlation, pc, &value);
                self.set_reg(at, dest, value)
            }
            DispatchOutcome::Invoke { code, args } => {
                self.log_invoke(correlation, pc, code);
                self.invoke(code, args, None, ReturnTarget::Register(dest))
            }
        }
    }

    // ========== Spesh ==========

    fn spesh_slot(&self, at: RecordRef, slot: u16) -> VmResult<Value> {
        self.state(at)?
            .spesh
            .as_ref()
            .and_then(|s| s.slots.get(slot as usize).cloned())
            .ok_or_else(|| VmError::adhoc(ErrorKind::Bytecode, format!("No spesh slot {}", slot)))
    }

    /// Falls back from specialized code to the original instructions.
    fn deopt(&mut self, at: RecordRef, deopt: u32, reason: DeoptReason) -> VmResult<()> {
        let routine = self.shared.routine(self.state(at)?.static_frame)?;
        let info = deoptimize(self.state_mut(at)?, routine.bytecode(), deopt, reason)?;
        log::debug!(
            "deoptimized {} candidate {} ({:?}), resuming at {}",
            routine.body().name,
            info.candidate,
            info.reason,
            info.resume_offset
        );
        routine
            .spesh()
            .record_deopt(info.candidate, self.shared.config.spesh.max_deopts);
        Ok(())
    }

    fn log_type(&mut self, correlation: u32, offset: u32, value: &Value) {
        if correlation == 0 || self.spesh_log.is_none() {
            return;
        }
        let Some(obj) = value.as_obj() else { return };
        let observed = observe(&self.shared.heap, obj);
        if let Some(ty) = observed {
            self.log(correlation, |c| LogEntry::Type {
                correlation: c,
                offset,
                ty,
            });
        }
    }

    fn log_invoke(&mut self, correlation: u32, offset: u32, code: ObjRef) {
        if correlation == 0 || self.spesh_log.is_none() {
            return;
        }
        let target = self.shared.heap.code(code).map(|c| c.static_frame).ok();
        if let Some(target) = target {
            self.log(correlation, |c| LogEntry::Invoke {
                correlation: c,
                offset,
                target,
            });
        }
    }
}
