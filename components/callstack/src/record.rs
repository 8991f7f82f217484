//! Call stack records.
//!
//! Every entry on the call stack is a [`Record`]; the enum discriminant is the
//! record kind and is always matched before a record's payload is used.

use bytecode_system::{CallsiteId, Instruction, Reg};
use core_types::{ObjRef, StaticFrameId, Value};
use std::sync::Arc;

/// Accounted size of a record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 32;
/// Accounted size of one register or lexical slot in bytes.
pub const SLOT_SIZE: usize = 16;

/// Where a returning frame delivers its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnTarget {
    /// Result is dropped
    Discard,
    /// Result goes into a register of the frame below
    Register(Reg),
    /// Result is handed back to the host that started the run loop
    Host,
}

/// State of an executing specialization, carried by the frame running it.
#[derive(Debug, Clone)]
pub struct SpeshFrameState {
    /// Id of the candidate within its routine
    pub candidate: u32,
    /// Deopt index to original instruction offset
    pub deopts: Arc<[u32]>,
    /// Spesh slots referenced by `SpGetSlot` and literal guards
    pub slots: Arc<[Value]>,
}

/// Part of a frame that always stays on the call stack.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// Routine being run
    pub static_frame: StaticFrameId,
    /// Code object invoked, if any
    pub code: Option<ObjRef>,
    /// Index of the next instruction
    pub pc: u32,
    /// Instruction stream being executed (original or specialized)
    pub bytecode: Arc<[Instruction]>,
    /// Set while running specialized code
    pub spesh: Option<SpeshFrameState>,
    /// Work registers
    pub work: Vec<Value>,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Shape the arguments were passed with
    pub callsite: CallsiteId,
    /// Where the result goes
    pub return_to: ReturnTarget,
    /// Correlation id used by the spesh log
    pub correlation: u32,
}

impl FrameState {
    fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        if let Some(code) = self.code {
            f(&Value::Obj(code));
        }
        self.work.iter().for_each(&mut *f);
        self.args.iter().for_each(&mut *f);
        if let Some(spesh) = &self.spesh {
            spesh.slots.iter().for_each(&mut *f);
        }
    }

    fn size(&self) -> usize {
        (self.work.len() + self.args.len()) * SLOT_SIZE
    }
}

/// Part of a frame that moves to the heap when the frame is promoted.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnv {
    /// Routine the environment belongs to
    pub static_frame: StaticFrameId,
    /// Lexical slots
    pub lexicals: Vec<Value>,
    /// Heap frame of the lexical outer
    pub outer: Option<ObjRef>,
}

impl FrameEnv {
    /// Visits every value a collector must trace.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        self.lexicals.iter().for_each(&mut *f);
        if let Some(outer) = self.outer {
            f(&Value::Obj(outer));
        }
    }
}

/// The kind of a record, for callers that only need the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// First record of every region
    StartOfRegion,
    /// Frame whose environment lives on the stack
    Frame,
    /// Frame allocated on the heap from the start
    HeapFrame,
    /// Frame whose environment was moved to the heap
    PromotedFrame,
    /// Continuation boundary left by `reset`
    ContinuationTag,
    /// A dispatch resolver is recording
    DispatchRecord,
    /// A dispatch program is running
    DispatchRun,
}

/// A call stack record.
#[derive(Debug, Clone)]
pub enum Record {
    /// Marks the start of a region; walks cross to the previous region here
    StartOfRegion,
    /// Inline frame
    Frame {
        /// Execution state
        state: FrameState,
        /// Environment
        env: FrameEnv,
    },
    /// Frame allocated directly on the heap
    HeapFrame {
        /// Execution state
        state: FrameState,
        /// Heap frame object holding the environment
        frame: ObjRef,
    },
    /// Frame promoted to the heap after it was pushed
    PromotedFrame {
        /// Execution state
        state: FrameState,
        /// Heap frame object holding the environment
        frame: ObjRef,
    },
    /// Continuation boundary
    ContinuationTag {
        /// Tag matched by `control`
        tag: Value,
        /// Register of the resetting frame that receives the reset's result
        result_reg: Reg,
    },
    /// Resolver in progress
    DispatchRecord {
        /// Dispatcher being resolved
        dispatcher: Arc<str>,
    },
    /// Dispatch program in progress
    DispatchRun {
        /// Program temporaries
        temps: Vec<Value>,
    },
}

impl Record {
    /// The kind tag of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::StartOfRegion => RecordKind::StartOfRegion,
            Record::Frame { .. } => RecordKind::Frame,
            Record::HeapFrame { .. } => RecordKind::HeapFrame,
            Record::PromotedFrame { .. } => RecordKind::PromotedFrame,
            Record::ContinuationTag { .. } => RecordKind::ContinuationTag,
            Record::DispatchRecord { .. } => RecordKind::DispatchRecord,
            Record::DispatchRun { .. } => RecordKind::DispatchRun,
        }
    }

    /// True for the three frame kinds.
    pub fn is_frame(&self) -> bool {
        matches!(
            self,
            Record::Frame { .. } | Record::HeapFrame { .. } | Record::PromotedFrame { .. }
        )
    }

    /// Execution state of a frame record.
    pub fn frame_state(&self) -> Option<&FrameState> {
        match self {
            Record::Frame { state, .. }
            | Record::HeapFrame { state, .. }
            | Record::PromotedFrame { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Mutable execution state of a frame record.
    pub fn frame_state_mut(&mut self) -> Option<&mut FrameState> {
        match self {
            Record::Frame { state, .. }
            | Record::HeapFrame { state, .. }
            | Record::PromotedFrame { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Heap frame object, for heap and promoted frames.
    pub fn heap_frame(&self) -> Option<ObjRef> {
        match self {
            Record::HeapFrame { frame, .. } | Record::PromotedFrame { frame, .. } => Some(*frame),
            _ => None,
        }
    }

    /// Accounted size in bytes.
    pub fn size(&self) -> usize {
        RECORD_HEADER_SIZE
            + match self {
                Record::Frame { state, env } => state.size() + env.lexicals.len() * SLOT_SIZE,
                Record::HeapFrame { state, .. } | Record::PromotedFrame { state, .. } => state.size(),
                Record::DispatchRun { temps } => temps.len() * SLOT_SIZE,
                _ => 0,
            }
    }

    /// Visits every value a collector must trace.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        match self {
            Record::Frame { state, env } => {
                state.visit_values(f);
                env.visit_values(f);
            }
            Record::HeapFrame { state, frame } | Record::PromotedFrame { state, frame } => {
                state.visit_values(f);
                f(&Value::Obj(*frame));
            }
            Record::ContinuationTag { tag, .. } => f(tag),
            Record::DispatchRun { temps } => temps.iter().for_each(f),
            Record::StartOfRegion | Record::DispatchRecord { .. } => {}
        }
    }
}
