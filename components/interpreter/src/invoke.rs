//! Frame entry and exit
//!
//! Entering a frame resolves what the invoked object runs, picks a spesh
//! candidate through the routine's argument guard tree and, when running the
//! original instructions, logs the entry for the specializer. Leaving a
//! frame delivers its result where the caller asked for it.

use crate::thread::ThreadContext;
use bytecode_system::{ArgFlag, CallsiteId, Reg};
use callstack::{FrameEnv, FrameState, Record, ReturnTarget, SpeshFrameState};
use core_types::{vm_panic, ErrorKind, ObjRef, StaticFrameId, Value, VmError, VmResult, PANIC_STACK};
use memory_manager::{Heap, InvocationHandler, ObjectBody};
use specializer::{ArgType, LogEntry, ObservedType, Routine, TypeTuple};
use std::sync::Arc;

/// What an invoked object runs.
struct Target {
    code: ObjRef,
    static_frame: StaticFrameId,
    outer: Option<ObjRef>,
}

fn resolve_target(heap: &Heap, code: ObjRef) -> VmResult<Target> {
    let obj = heap
        .object(code)
        .ok_or_else(|| VmError::type_check(format!("Cannot invoke freed object {}", code)))?;
    if let ObjectBody::Code(body) = &obj.body {
        return Ok(Target {
            code,
            static_frame: body.static_frame,
            outer: body.outer,
        });
    }
    let handler = obj.stable.invocation();
    drop(obj);
    if let Some(InvocationHandler::AttributeCode(slot)) = handler {
        if let Value::Obj(inner) = heap.get_attribute(code, slot as usize)? {
            let body = heap.code(inner)?;
            return Ok(Target {
                code: inner,
                static_frame: body.static_frame,
                outer: body.outer,
            });
        }
    }
    // Reports type objects and non-code objects
    heap.code(code)?;
    Err(VmError::type_check(format!("Cannot invoke {}", code)))
}

/// Type information logged for one argument.
pub(crate) fn arg_type(heap: &Heap, value: &Value) -> Option<ArgType> {
    let obj = value.as_obj()?;
    let o = heap.object(obj)?;
    let decont = match &o.body {
        ObjectBody::Container(c) => c.value.as_obj().and_then(|inner| observe(heap, inner)),
        _ => None,
    };
    Some(ArgType {
        ty: ObservedType {
            stable: o.stable.id(),
            concrete: o.is_concrete(),
        },
        decont,
        rw: matches!(&o.body, ObjectBody::Container(c) if c.rw),
    })
}

pub(crate) fn observe(heap: &Heap, obj: ObjRef) -> Option<ObservedType> {
    heap.object(obj).map(|o| ObservedType {
        stable: o.stable.id(),
        concrete: o.is_concrete(),
    })
}

impl ThreadContext {
    /// Pushes a frame for `code` on top of the stack. The run loop picks it
    /// up at its next instruction.
    ///
    /// # Arguments
    ///
    /// * `code` - Object to invoke
    /// * `args` - Positional arguments
    /// * `callsite` - Shape of `args`; interned from them when `None`
    /// * `return_to` - Where the frame's result goes
    pub(crate) fn invoke(
        &mut self,
        code: ObjRef,
        args: Vec<Value>,
        callsite: Option<CallsiteId>,
        return_to: ReturnTarget,
    ) -> VmResult<()> {
        let shared = Arc::clone(&self.shared);
        let callsite = callsite.unwrap_or_else(|| {
            let flags: Vec<ArgFlag> = args.iter().map(ArgFlag::of).collect();
            shared.callsites.intern(&flags)
        });
        let heap = &shared.heap;
        let target = resolve_target(heap, code)?;
        let (routine, heap_env) = shared.entry(target.static_frame)?;
        let candidate = if shared.config.spesh.enabled {
            routine.spesh().select(callsite, &args, heap)
        } else {
            None
        };
        let types: Option<TypeTuple> = match (&candidate, &self.spesh_log) {
            (None, Some(_)) => Some(args.iter().map(|a| arg_type(heap, a)).collect()),
            _ => None,
        };
        let body = routine.body();
        if args.len() < body.num_params as usize {
            return Err(VmError::adhoc(
                ErrorKind::Arity,
                format!(
                    "Too few positionals passed to '{}'; expected {} arguments but got {}",
                    body.name,
                    body.num_params,
                    args.len()
                ),
            ));
        }

        let (bytecode, spesh, registers) = match &candidate {
            Some(c) => (
                c.bytecode.clone(),
                Some(SpeshFrameState {
                    candidate: c.id(),
                    deopts: c.deopts.clone(),
                    slots: c.slots.clone(),
                }),
                c.num_registers,
            ),
            None => (routine.bytecode().clone(), None, body.num_registers),
        };
        let correlation = match types {
            Some(types) => self.log_entry(&routine, callsite, types),
            None => 0,
        };
        let state = FrameState {
            static_frame: target.static_frame,
            code: Some(target.code),
            pc: 0,
            bytecode,
            spesh,
            work: vec![Value::Null; registers as usize],
            args,
            callsite,
            return_to,
            correlation,
        };
        let env = FrameEnv {
            static_frame: target.static_frame,
            lexicals: vec![Value::Null; body.num_lexicals as usize],
            outer: target.outer,
        };
        if heap_env {
            let frame = heap.new_frame(self.id(), &shared.types.frame, env)?;
            self.check_nursery(heap.wants_collection(self.id()));
            self.stack.push_heap_frame(state, frame);
        } else {
            self.stack.push_frame(state, env);
        }
        Ok(())
    }

    fn log_entry(&mut self, routine: &Routine, callsite: CallsiteId, types: TypeTuple) -> u32 {
        let depth = self.stack.depth() as u32;
        let Some(log) = self.spesh_log.as_mut() else { return 0 };
        let correlation = log.next_correlation();
        log.record(LogEntry::Entry {
            correlation,
            routine: routine.id(),
            callsite,
            types,
            depth,
        });
        correlation
    }

    /// Logs an observation of the frame with `correlation`, if it is being
    /// logged.
    pub(crate) fn log(&mut self, correlation: u32, entry: impl FnOnce(u32) -> LogEntry) {
        if correlation == 0 {
            return;
        }
        if let Some(log) = self.spesh_log.as_mut() {
            log.record(entry(correlation));
        }
    }

    /// Pops the current frame and delivers `value`.
    ///
    /// # Returns
    ///
    /// `Some(value)` when the frame was invoked by the host, which ends the
    /// run loop.
    pub(crate) fn return_value(&mut self, value: Value) -> VmResult<Option<Value>> {
        let record = match self.stack.pop() {
            Some(record) if record.is_frame() => record,
            _ => vm_panic(PANIC_STACK, "return with no frame on top of the call stack"),
        };
        let (return_to, logged) = match record.frame_state() {
            Some(state) => (state.return_to, state.correlation != 0),
            None => vm_panic(PANIC_STACK, "frame record without execution state"),
        };
        // A finished reset leaves its boundary behind
        while matches!(self.stack.top(), Some(Record::ContinuationTag { .. })) {
            self.stack.pop();
        }
        if logged && self.shared.config.spesh.blocking {
            self.flush_spesh_log();
        }
        match return_to {
            ReturnTarget::Host => Ok(Some(value)),
            ReturnTarget::Discard => Ok(None),
            ReturnTarget::Register(reg) => {
                self.deliver(reg, value)?;
                Ok(None)
            }
        }
    }

    /// Writes a result into the current frame.
    pub(crate) fn deliver(&mut self, reg: Reg, value: Value) -> VmResult<()> {
        let at = self
            .stack
            .current_frame()
            .ok_or_else(|| VmError::adhoc(ErrorKind::Bytecode, "No frame to return into"))?;
        self.set_reg(at, reg, value)
    }
}
