//! The recorder handed to dispatch callbacks
//!
//! Callbacks resolve a call by looking at its arguments, but every fact
//! they rely on must be recorded as a guard so the resulting program can be
//! replayed against later calls. The recorder makes that explicit: values
//! are only reachable through [`Tracked`] handles, and each guard the
//! callback asks for is appended to the program being built.

use crate::program::{Outcome, Program, ProgramOp, ValueSource, MAX_TEMPS};
use crate::registry::DispatcherRegistry;
use bytecode_system::CallsiteId;
use core_types::{ErrorKind, ObjRef, ObjectInspector, Value, VmError, VmResult};
use std::sync::Arc;

/// The arguments of one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Capture<'c> {
    /// Dispatcher to resolve with
    pub dispatcher: &'c str,
    /// Interned shape of the call
    pub callsite: CallsiteId,
    /// Argument values
    pub args: &'c [Value],
}

/// A value the program being recorded can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracked(u16);

#[derive(Debug, Clone)]
struct ArgSlot {
    source: ValueSource,
    value: Value,
}

/// Records a dispatch program while a callback resolves a capture.
pub struct Recorder<'a> {
    registry: &'a DispatcherRegistry,
    inspector: &'a dyn ObjectInspector,
    dispatcher: Arc<str>,
    callsite: CallsiteId,
    args: Vec<ArgSlot>,
    loaded: Vec<Option<u16>>,
    temps: Vec<Value>,
    ops: Vec<ProgramOp>,
    outcome: Option<Outcome>,
    depth: usize,
}

impl<'a> Recorder<'a> {
    pub(crate) fn new(
        registry: &'a DispatcherRegistry,
        inspector: &'a dyn ObjectInspector,
        capture: &Capture<'_>,
    ) -> Self {
        Recorder {
            registry,
            inspector,
            dispatcher: Arc::from(capture.dispatcher),
            callsite: capture.callsite,
            args: capture
                .args
                .iter()
                .enumerate()
                .map(|(i, v)| ArgSlot {
                    source: ValueSource::Arg(i as u16),
                    value: v.clone(),
                })
                .collect(),
            loaded: vec![None; capture.args.len()],
            temps: Vec::new(),
            ops: Vec::new(),
            outcome: None,
            depth: 0,
        }
    }

    /// Id of the dispatcher being resolved.
    pub fn dispatcher(&self) -> &str {
        &self.dispatcher
    }

    /// Callsite shape of the capture.
    pub fn callsite(&self) -> CallsiteId {
        self.callsite
    }

    /// Number of arguments in the current argument list.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Heap queries for callbacks that inspect tracked objects.
    pub fn inspector(&self) -> &dyn ObjectInspector {
        self.inspector
    }

    /// The live value behind a tracked handle.
    pub fn value(&self, t: Tracked) -> &Value {
        // Tracked handles are only minted by this recorder
        &self.temps[t.0 as usize]
    }

    fn protocol(&self, message: String) -> VmError {
        VmError::adhoc(ErrorKind::DispatchProtocol, message)
    }

    fn new_temp(&mut self, value: Value) -> VmResult<u16> {
        if self.temps.len() >= MAX_TEMPS {
            return Err(self.protocol(format!(
                "Dispatcher '{}' needs more than {} temporaries",
                self.dispatcher, MAX_TEMPS
            )));
        }
        self.temps.push(value);
        Ok((self.temps.len() - 1) as u16)
    }

    fn slot(&self, i: usize) -> VmResult<&ArgSlot> {
        self.args.get(i).ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::Bounds,
                format!("Argument {} out of range (have {})", i, self.args.len()),
            )
        })
    }

    fn push_op(&mut self, op: ProgramOp) {
        if !self.ops.contains(&op) {
            self.ops.push(op);
        }
    }

    /// Tracks the argument at position `i` of the current argument list.
    pub fn track_arg(&mut self, i: usize) -> VmResult<Tracked> {
        let slot = self.slot(i)?.clone();
        match slot.source {
            ValueSource::Arg(arg) => {
                if let Some(temp) = self.loaded[arg as usize] {
                    return Ok(Tracked(temp));
                }
                let temp = self.new_temp(slot.value)?;
                self.ops.push(ProgramOp::LoadArg { arg, temp });
                self.loaded[arg as usize] = Some(temp);
                Ok(Tracked(temp))
            }
            ValueSource::Temp(temp) => Ok(Tracked(temp)),
            ValueSource::Const(value) => {
                let temp = self.new_temp(value.clone())?;
                self.ops.push(ProgramOp::LoadConst { value, temp });
                Ok(Tracked(temp))
            }
        }
    }

    /// Guards the type of a tracked value: its STable for objects, its
    /// kind for native integers.
    pub fn guard_type(&mut self, t: Tracked) -> VmResult<()> {
        let op = match self.value(t) {
            Value::Obj(obj) => {
                let stable = self.inspector.stable_of(*obj).ok_or_else(|| {
                    self.protocol(format!("Cannot guard the type of dead object {:?}", obj))
                })?;
                ProgramOp::GuardType { temp: t.0, stable }
            }
            Value::Int(_) => ProgramOp::TestInt { temp: t.0 },
            other => {
                return Err(self.protocol(format!(
                    "Cannot guard the type of a {:?} value",
                    other.kind()
                )))
            }
        };
        self.push_op(op);
        Ok(())
    }

    /// Guards whether a tracked object is concrete or a type object.
    pub fn guard_concreteness(&mut self, t: Tracked) -> VmResult<()> {
        let op = match self.value(t) {
            Value::Obj(obj) if self.inspector.is_concrete(*obj) => ProgramOp::GuardConcrete { temp: t.0 },
            Value::Obj(_) => ProgramOp::GuardTypeObject { temp: t.0 },
            other => {
                return Err(self.protocol(format!(
                    "Cannot guard the concreteness of a {:?} value",
                    other.kind()
                )))
            }
        };
        self.push_op(op);
        Ok(())
    }

    /// Guards that a tracked value is exactly its current value.
    pub fn guard_literal(&mut self, t: Tracked) -> VmResult<()> {
        let temp = t.0;
        let op = match self.value(t) {
            Value::Int(value) => ProgramOp::GuardLiteralInt { temp, value: *value },
            Value::Num(value) => ProgramOp::GuardLiteralNum { temp, value: *value },
            Value::Str(value) => ProgramOp::GuardLiteralStr {
                temp,
                value: value.clone(),
            },
            Value::Obj(obj) => ProgramOp::GuardLiteralObj { temp, obj: *obj },
            Value::Null => return Err(self.protocol("Cannot guard a null literal".to_string())),
        };
        self.push_op(op);
        Ok(())
    }

    /// Guards that a tracked value is not the given object.
    pub fn guard_not_literal_obj(&mut self, t: Tracked, obj: ObjRef) -> VmResult<()> {
        if self.value(t).as_obj() == Some(obj) {
            return Err(self.protocol(format!(
                "Cannot guard that a value is not {:?} when it is",
                obj
            )));
        }
        self.push_op(ProgramOp::GuardNotLiteralObj { temp: t.0, obj });
        Ok(())
    }

    /// Tracks the content of a container. Non-containers track as
    /// themselves.
    pub fn track_decont(&mut self, t: Tracked) -> VmResult<Tracked> {
        let value = match self.value(t) {
            Value::Obj(obj) => self.inspector.decont(*obj).unwrap_or(Value::Obj(*obj)),
            other => other.clone(),
        };
        let dest = self.new_temp(value)?;
        self.ops.push(ProgramOp::Decont { src: t.0, dest });
        Ok(Tracked(dest))
    }

    /// Removes the argument at position `i` from the current argument list.
    pub fn drop_arg(&mut self, i: usize) -> VmResult<()> {
        self.slot(i)?;
        self.args.remove(i);
        Ok(())
    }

    /// Inserts a constant into the current argument list at position `i`.
    pub fn insert_arg(&mut self, i: usize, value: Value) -> VmResult<()> {
        self.insert(
            i,
            ArgSlot {
                source: ValueSource::Const(value.clone()),
                value,
            },
        )
    }

    /// Inserts a tracked value into the current argument list at position `i`.
    pub fn insert_tracked(&mut self, i: usize, t: Tracked) -> VmResult<()> {
        let value = self.value(t).clone();
        self.insert(
            i,
            ArgSlot {
                source: ValueSource::Temp(t.0),
                value,
            },
        )
    }

    fn insert(&mut self, i: usize, slot: ArgSlot) -> VmResult<()> {
        if i > self.args.len() {
            return Err(VmError::adhoc(
                ErrorKind::Bounds,
                format!("Cannot insert argument at {} (have {})", i, self.args.len()),
            ));
        }
        self.args.insert(i, slot);
        Ok(())
    }

    /// Continues resolution with another dispatcher over the current
    /// argument list.
    pub fn delegate(&mut self, id: &str) -> VmResult<()> {
        if self.depth >= self.registry.config().max_delegation_depth {
            return Err(self.protocol(format!(
                "Delegation from '{}' to '{}' is nested too deeply",
                self.dispatcher, id
            )));
        }
        let target = self.registry.find(id)?;
        log::trace!("dispatcher '{}' delegates to '{}'", self.dispatcher, id);
        self.depth += 1;
        let result = target.dispatch(self);
        self.depth -= 1;
        result
    }

    fn set_outcome(&mut self, outcome: Outcome) -> VmResult<()> {
        if self.outcome.is_some() {
            return Err(self.protocol(format!(
                "Dispatcher '{}' produced more than one result",
                self.dispatcher
            )));
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Ends the dispatch with a constant.
    pub fn result_constant(&mut self, value: Value) -> VmResult<()> {
        self.set_outcome(Outcome::Value(ValueSource::Const(value)))
    }

    /// Ends the dispatch with a tracked value.
    pub fn result_value(&mut self, t: Tracked) -> VmResult<()> {
        self.set_outcome(Outcome::Value(ValueSource::Temp(t.0)))
    }

    /// Ends the dispatch by invoking the tracked code object with the
    /// current argument list.
    pub fn result_code_invocation(&mut self, code: Tracked) -> VmResult<()> {
        let args = self.args.iter().map(|slot| slot.source.clone()).collect();
        self.set_outcome(Outcome::Invoke {
            code: ValueSource::Temp(code.0),
            args,
        })
    }

    pub(crate) fn finish(self) -> VmResult<Program> {
        let outcome = self.outcome.ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::DispatchProtocol,
                format!("Dispatcher '{}' did not produce a result", self.dispatcher),
            )
        })?;
        log::trace!(
            "recorded program for '{}': {} ops, {} temps",
            self.dispatcher,
            self.ops.len(),
            self.temps.len()
        );
        Ok(Program::new(
            self.dispatcher,
            self.callsite,
            self.ops,
            self.temps.len() as u16,
            outcome,
        ))
    }
}
