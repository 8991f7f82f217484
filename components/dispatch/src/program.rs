//! Compiled dispatch programs
//!
//! A program is the recorded form of one resolution: a straight line of
//! guards over the arguments, followed by an outcome. Running it against a
//! new set of arguments either reproduces the outcome or fails at the first
//! guard that no longer holds, in which case the caller resolves again.

use arrayvec::ArrayVec;
use bytecode_system::CallsiteId;
use core_types::{ErrorKind, ObjRef, ObjectInspector, StableId, Value, VmError, VmResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Temporaries a program may use.
pub const MAX_TEMPS: usize = 16;

/// Caller-provided temporary storage for running programs.
pub type Temps = ArrayVec<Value, MAX_TEMPS>;

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Where an outcome value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// An argument of the call, by position
    Arg(u16),
    /// A temporary filled by the program
    Temp(u16),
    /// A constant recorded with the program
    Const(Value),
}

impl ValueSource {
    /// Produces the value for a run over `args` that filled `temps`.
    pub fn resolve(&self, args: &[Value], temps: &[Value]) -> Value {
        match self {
            ValueSource::Arg(i) => args.get(*i as usize).cloned().unwrap_or_default(),
            ValueSource::Temp(t) => temps.get(*t as usize).cloned().unwrap_or_default(),
            ValueSource::Const(v) => v.clone(),
        }
    }
}

/// One step of a program.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramOp {
    /// `temp = args[arg]`
    LoadArg {
        /// Argument position
        arg: u16,
        /// Destination temporary
        temp: u16,
    },
    /// `temp = value`
    LoadConst {
        /// Constant loaded
        value: Value,
        /// Destination temporary
        temp: u16,
    },
    /// The temporary is an object of the given type
    GuardType {
        /// Guarded temporary
        temp: u16,
        /// Expected STable
        stable: StableId,
    },
    /// The temporary is a concrete object
    GuardConcrete {
        /// Guarded temporary
        temp: u16,
    },
    /// The temporary is a type object
    GuardTypeObject {
        /// Guarded temporary
        temp: u16,
    },
    /// The temporary is exactly this integer
    GuardLiteralInt {
        /// Guarded temporary
        temp: u16,
        /// Expected value
        value: i64,
    },
    /// The temporary is exactly this float, compared bitwise
    GuardLiteralNum {
        /// Guarded temporary
        temp: u16,
        /// Expected value
        value: f64,
    },
    /// The temporary is exactly this string
    GuardLiteralStr {
        /// Guarded temporary
        temp: u16,
        /// Expected value
        value: Arc<str>,
    },
    /// The temporary is this object
    GuardLiteralObj {
        /// Guarded temporary
        temp: u16,
        /// Expected object
        obj: ObjRef,
    },
    /// The temporary is anything but this object
    GuardNotLiteralObj {
        /// Guarded temporary
        temp: u16,
        /// Excluded object
        obj: ObjRef,
    },
    /// `dest = decont(src)`; non-containers pass through unchanged
    Decont {
        /// Source temporary
        src: u16,
        /// Destination temporary
        dest: u16,
    },
    /// The temporary is a native integer
    TestInt {
        /// Guarded temporary
        temp: u16,
    },
}

impl ProgramOp {
    /// The temporary the op writes or tests.
    pub fn temp(&self) -> u16 {
        match self {
            ProgramOp::LoadArg { temp, .. }
            | ProgramOp::LoadConst { temp, .. }
            | ProgramOp::GuardType { temp, .. }
            | ProgramOp::GuardConcrete { temp }
            | ProgramOp::GuardTypeObject { temp }
            | ProgramOp::GuardLiteralInt { temp, .. }
            | ProgramOp::GuardLiteralNum { temp, .. }
            | ProgramOp::GuardLiteralStr { temp, .. }
            | ProgramOp::GuardLiteralObj { temp, .. }
            | ProgramOp::GuardNotLiteralObj { temp, .. }
            | ProgramOp::TestInt { temp } => *temp,
            ProgramOp::Decont { dest, .. } => *dest,
        }
    }
}

/// What a successful run produces.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A value, delivered to the dispatch result register
    Value(ValueSource),
    /// Invoke a code object with the given arguments
    Invoke {
        /// The code object
        code: ValueSource,
        /// Arguments passed to it
        args: Box<[ValueSource]>,
    },
}

impl Outcome {
    /// Materializes the outcome of a run.
    pub fn resolve(&self, args: &[Value], temps: &[Value]) -> VmResult<DispatchOutcome> {
        match self {
            Outcome::Value(src) => Ok(DispatchOutcome::Value(src.resolve(args, temps))),
            Outcome::Invoke { code, args: sources } => {
                let code = match code.resolve(args, temps) {
                    Value::Obj(obj) => obj,
                    other => {
                        return Err(VmError::type_check(format!(
                            "Cannot invoke a {:?} as code",
                            other.kind()
                        )))
                    }
                };
                Ok(DispatchOutcome::Invoke {
                    code,
                    args: sources.iter().map(|s| s.resolve(args, temps)).collect(),
                })
            }
        }
    }
}

/// A materialized outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The dispatch produced a value
    Value(Value),
    /// The dispatch wants a code object invoked
    Invoke {
        /// Code object
        code: ObjRef,
        /// Arguments
        args: Vec<Value>,
    },
}

/// A compiled dispatch program.
#[derive(Debug)]
pub struct Program {
    id: u64,
    dispatcher: Arc<str>,
    callsite: CallsiteId,
    ops: Box<[ProgramOp]>,
    num_temps: u16,
    outcome: Outcome,
}

impl Program {
    pub(crate) fn new(
        dispatcher: Arc<str>,
        callsite: CallsiteId,
        ops: Vec<ProgramOp>,
        num_temps: u16,
        outcome: Outcome,
    ) -> Self {
        Program {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            dispatcher,
            callsite,
            ops: ops.into_boxed_slice(),
            num_temps,
            outcome,
        }
    }

    /// Unique id, stable for the life of the program.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the dispatcher that recorded the program.
    pub fn dispatcher(&self) -> &str {
        &self.dispatcher
    }

    /// Callsite shape the program was recorded for.
    pub fn callsite(&self) -> CallsiteId {
        self.callsite
    }

    /// Guard ops in execution order.
    pub fn ops(&self) -> &[ProgramOp] {
        &self.ops
    }

    /// Temporaries the program uses.
    pub fn num_temps(&self) -> usize {
        self.num_temps as usize
    }

    /// The outcome of a successful run.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Runs the guards against `args`. Returns the outcome if all hold.
    ///
    /// `temps` is cleared and refilled; on success it holds the values the
    /// outcome's `Temp` sources refer to.
    pub fn run<'p>(
        &'p self,
        callsite: CallsiteId,
        args: &[Value],
        inspector: &dyn ObjectInspector,
        temps: &mut Temps,
    ) -> Option<&'p Outcome> {
        if callsite != self.callsite {
            return None;
        }
        temps.clear();
        for _ in 0..self.num_temps {
            temps.try_push(Value::Null).ok()?;
        }
        for op in self.ops.iter() {
            if !step(op, args, inspector, temps) {
                return None;
            }
        }
        Some(&self.outcome)
    }

    /// Runs the program and materializes its outcome, failing if a guard
    /// does not hold.
    pub fn evaluate(
        &self,
        callsite: CallsiteId,
        args: &[Value],
        inspector: &dyn ObjectInspector,
        temps: &mut Temps,
    ) -> VmResult<DispatchOutcome> {
        match self.run(callsite, args, inspector, temps) {
            Some(outcome) => outcome.resolve(args, temps),
            None => Err(VmError::adhoc(
                ErrorKind::DispatchProtocol,
                format!(
                    "Dispatch program of '{}' does not match the arguments it was recorded from",
                    self.dispatcher
                ),
            )),
        }
    }

    /// Every value the program holds on to; they are GC roots while the
    /// program is reachable.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        for op in self.ops.iter() {
            match op {
                ProgramOp::LoadConst { value, .. } => f(value),
                ProgramOp::GuardLiteralObj { obj, .. } | ProgramOp::GuardNotLiteralObj { obj, .. } => {
                    f(&Value::Obj(*obj))
                }
                _ => {}
            }
        }
        let mut visit_source = |src: &ValueSource| {
            if let ValueSource::Const(v) = src {
                f(v)
            }
        };
        match &self.outcome {
            Outcome::Value(src) => visit_source(src),
            Outcome::Invoke { code, args } => {
                visit_source(code);
                args.iter().for_each(visit_source);
            }
        }
    }
}

fn step(op: &ProgramOp, args: &[Value], inspector: &dyn ObjectInspector, temps: &mut Temps) -> bool {
    let temp = op.temp() as usize;
    match op {
        ProgramOp::LoadArg { arg, .. } => match (args.get(*arg as usize), temps.get_mut(temp)) {
            (Some(v), Some(slot)) => {
                *slot = v.clone();
                true
            }
            _ => false,
        },
        ProgramOp::LoadConst { value, .. } => match temps.get_mut(temp) {
            Some(slot) => {
                *slot = value.clone();
                true
            }
            None => false,
        },
        ProgramOp::Decont { src, .. } => {
            let value = match temps.get(*src as usize) {
                Some(Value::Obj(obj)) => inspector.decont(*obj).unwrap_or(Value::Obj(*obj)),
                Some(other) => other.clone(),
                None => return false,
            };
            match temps.get_mut(temp) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }
        guard => match temps.get(temp) {
            Some(value) => check(guard, value, inspector),
            None => false,
        },
    }
}

fn check(op: &ProgramOp, value: &Value, inspector: &dyn ObjectInspector) -> bool {
    match (op, value) {
        (ProgramOp::GuardType { stable, .. }, Value::Obj(obj)) => {
            inspector.stable_of(*obj) == Some(*stable)
        }
        (ProgramOp::GuardConcrete { .. }, Value::Obj(obj)) => inspector.is_concrete(*obj),
        (ProgramOp::GuardTypeObject { .. }, Value::Obj(obj)) => !inspector.is_concrete(*obj),
        (ProgramOp::GuardLiteralInt { value: want, .. }, Value::Int(i)) => i == want,
        (ProgramOp::GuardLiteralNum { value: want, .. }, Value::Num(n)) => {
            n.to_bits() == want.to_bits()
        }
        (ProgramOp::GuardLiteralStr { value: want, .. }, Value::Str(s)) => s == want,
        (ProgramOp::GuardLiteralObj { obj: want, .. }, Value::Obj(obj)) => obj == want,
        (ProgramOp::GuardNotLiteralObj { obj: excluded, .. }, v) => v.as_obj() != Some(*excluded),
        (ProgramOp::TestInt { .. }, Value::Int(_)) => true,
        _ => false,
    }
}
