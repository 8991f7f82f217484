//! Opcode definitions for the register-based instruction set.
//!
//! Every operand that names a register is a [`Reg`]. Branch targets are
//! instruction indices within the same frame body. Opcodes prefixed with
//! `Sp` only ever appear in specialized code produced by the specializer.

use crate::callsite::CallsiteId;
use core_types::{StableId, StaticFrameId};
use std::sync::Arc;

/// Register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u16);

impl Reg {
    /// Register index as usize.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bytecode operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    /// Does nothing
    Noop,

    // ========== Constants and moves ==========
    /// Load integer constant
    ConstI {
        /// Register receiving the result
        dest: Reg,
        /// Constant to load
        value: i64,
    },
    /// Load float constant
    ConstN {
        /// Register receiving the result
        dest: Reg,
        /// Constant to load
        value: f64,
    },
    /// Load string constant
    ConstS {
        /// Register receiving the result
        dest: Reg,
        /// Constant to load
        value: Arc<str>,
    },
    /// Load null
    Null {
        /// Register receiving the result
        dest: Reg,
    },
    /// Copy a register
    Set {
        /// Register receiving the result
        dest: Reg,
        /// Register copied
        src: Reg,
    },

    // ========== Native arithmetic ==========
    /// Integer addition (wrapping)
    AddI {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },
    /// Integer subtraction (wrapping)
    SubI {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },
    /// Integer multiplication (wrapping)
    MulI {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },
    /// Integer less-than, 1 or 0
    LtI {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },
    /// Integer less-or-equal, 1 or 0
    LeI {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },
    /// Integer equality, 1 or 0
    EqI {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },
    /// Float addition
    AddN {
        /// Register receiving the result
        dest: Reg,
        /// Left operand
        a: Reg,
        /// Right operand
        b: Reg,
    },

    // ========== Control flow ==========
    /// Unconditional jump
    Goto {
        /// Instruction index to jump to
        target: u32,
    },
    /// Jump if truthy
    IfI {
        /// Register tested
        cond: Reg,
        /// Instruction index to jump to
        target: u32,
    },
    /// Jump if falsy
    UnlessI {
        /// Register tested
        cond: Reg,
        /// Instruction index to jump to
        target: u32,
    },

    // ========== Frame I/O ==========
    /// Load positional argument
    Param {
        /// Register receiving the result
        dest: Reg,
        /// Position of the argument
        index: u16,
    },
    /// Return a register's value to the caller
    Return {
        /// Register holding the value returned
        src: Reg,
    },
    /// Return null to the caller
    ReturnVoid,

    // ========== Lexicals and closures ==========
    /// Read lexical `index` of the frame `outers` levels out
    GetLex {
        /// Register receiving the result
        dest: Reg,
        /// Frames to walk out along the outer chain
        outers: u16,
        /// Lexical slot
        index: u16,
    },
    /// Write lexical `index` of the frame `outers` levels out
    BindLex {
        /// Frames to walk out along the outer chain
        outers: u16,
        /// Lexical slot
        index: u16,
        /// Register holding the value to bind
        src: Reg,
    },
    /// Load the static code object of a routine
    GetCode {
        /// Register receiving the result
        dest: Reg,
        /// Routine whose static code object is loaded
        frame: StaticFrameId,
    },
    /// Clone a code object, capturing the current frame as its outer
    TakeClosure {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the code object
        src: Reg,
    },

    // ========== Dispatch ==========
    /// Resolve and perform a call through a named dispatcher
    Dispatch {
        /// Register receiving the result
        dest: Reg,
        /// Dispatcher to resolve through
        dispatcher: Arc<str>,
        /// Shape of the arguments
        callsite: CallsiteId,
        /// Argument registers
        args: Box<[Reg]>,
        /// Inline cache slot of this site
        cache: u16,
    },

    // ========== Objects ==========
    /// Allocate an instance of the type object in `type_reg`
    Create {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the type object
        type_reg: Reg,
    },
    /// Box a native int into an instance of `type_reg`
    BoxI {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the native int
        src: Reg,
        /// Register holding the type object
        type_reg: Reg,
    },
    /// Box a native num into an instance of `type_reg`
    BoxN {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the native num
        src: Reg,
        /// Register holding the type object
        type_reg: Reg,
    },
    /// Box a native str into an instance of `type_reg`
    BoxS {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the native str
        src: Reg,
        /// Register holding the type object
        type_reg: Reg,
    },
    /// Unbox a native int
    UnboxI {
        /// Register receiving the result
        dest: Reg,
        /// Source register
        src: Reg,
    },
    /// Unbox a native num
    UnboxN {
        /// Register receiving the result
        dest: Reg,
        /// Source register
        src: Reg,
    },
    /// Unbox a native str
    UnboxS {
        /// Register receiving the result
        dest: Reg,
        /// Source register
        src: Reg,
    },
    /// Take the value out of a container (identity on non-containers)
    Decont {
        /// Register receiving the result
        dest: Reg,
        /// Source register
        src: Reg,
    },
    /// Store into an rw container
    Assign {
        /// Register holding the container
        container: Reg,
        /// Register holding the value to store
        src: Reg,
    },
    /// 1 if the object is concrete, else 0
    IsConcrete {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the value tested
        src: Reg,
    },
    /// 1 if the object's type is exactly `type_reg`, else 0
    IsType {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the object tested
        src: Reg,
        /// Register holding the type object
        type_reg: Reg,
    },
    /// Read attribute slot
    GetAttr {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the object
        obj: Reg,
        /// Attribute slot
        slot: u16,
    },
    /// Write attribute slot
    BindAttr {
        /// Register holding the object
        obj: Reg,
        /// Attribute slot
        slot: u16,
        /// Register holding the value to store
        src: Reg,
    },
    /// Append to an array
    Push {
        /// Register holding the array
        array: Reg,
        /// Register holding the value to append
        src: Reg,
    },
    /// Read an array element
    AtPos {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the array
        array: Reg,
        /// Register holding the element index
        index: Reg,
    },
    /// Write an array element
    BindPos {
        /// Register holding the array
        array: Reg,
        /// Register holding the element index
        index: Reg,
        /// Register holding the value to store
        src: Reg,
    },
    /// Number of elements
    Elems {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the array
        array: Reg,
    },
    /// REPR-level copy of an object
    Clone {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the object to copy
        src: Reg,
    },

    // ========== Continuations ==========
    /// Mark a continuation boundary tagged by `tag` and invoke `code`
    Reset {
        /// Register receiving the result of `code` or of a capturing handler
        dest: Reg,
        /// Register holding the continuation tag
        tag: Reg,
        /// Register holding the code object to run inside the boundary
        code: Reg,
    },
    /// Capture up to the matching reset and invoke `code` with it
    Control {
        /// Register the resumed continuation delivers into
        dest: Reg,
        /// Keep the boundary on the stack so it can be captured again
        protect: bool,
        /// Register holding the continuation tag
        tag: Reg,
        /// Register holding the handler invoked with the continuation
        code: Reg,
    },
    /// Resume a continuation, delivering `value` into its control's result
    ContinuationInvoke {
        /// Register receiving what the continuation returns
        dest: Reg,
        /// Register holding the continuation
        cont: Reg,
        /// Register holding the value the capture delivers
        value: Reg,
    },
    /// Fresh, not yet invoked copy of a continuation
    ContinuationClone {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the continuation
        src: Reg,
    },

    // ========== GC ==========
    /// Explicit safepoint poll
    Safepoint,
    /// Request a collection; full if `full` is set
    CollectGarbage {
        /// Collect both generations
        full: bool,
    },

    // ========== Specialized code only ==========
    /// Deoptimize unless the object has the given type and concreteness
    SpGuardType {
        /// Register guarded
        reg: Reg,
        /// Expected type
        stable: StableId,
        /// Expected concreteness, if it matters
        concrete: Option<bool>,
        /// Deopt point to fall back through
        deopt: u32,
    },
    /// Deoptimize unless the register holds the integer
    SpGuardLiteralInt {
        /// Register guarded
        reg: Reg,
        /// Expected integer
        value: i64,
        /// Deopt point to fall back through
        deopt: u32,
    },
    /// Deoptimize unless the register holds the object in a spesh slot
    SpGuardLiteralObj {
        /// Register guarded
        reg: Reg,
        /// Spesh slot holding the expected object
        slot: u16,
        /// Deopt point to fall back through
        deopt: u32,
    },
    /// Load a value from the candidate's spesh slots
    SpGetSlot {
        /// Register receiving the result
        dest: Reg,
        /// Spesh slot to load
        slot: u16,
    },
    /// Invoke a code object without going through dispatch
    SpFastInvoke {
        /// Register receiving the result
        dest: Reg,
        /// Register holding the code object
        code: Reg,
        /// Shape of the arguments
        callsite: CallsiteId,
        /// Argument registers
        args: Box<[Reg]>,
    },
}

impl Opcode {
    /// The register written by this operation, if any.
    pub fn defines(&self) -> Option<Reg> {
        use Opcode::*;
        match self {
            ConstI { dest, .. }
            | ConstN { dest, .. }
            | ConstS { dest, .. }
            | Null { dest }
            | Set { dest, .. }
            | AddI { dest, .. }
            | SubI { dest, .. }
            | MulI { dest, .. }
            | LtI { dest, .. }
            | LeI { dest, .. }
            | EqI { dest, .. }
            | AddN { dest, .. }
            | Param { dest, .. }
            | GetLex { dest, .. }
            | GetCode { dest, .. }
            | TakeClosure { dest, .. }
            | Dispatch { dest, .. }
            | Create { dest, .. }
            | BoxI { dest, .. }
            | BoxN { dest, .. }
            | BoxS { dest, .. }
            | UnboxI { dest, .. }
            | UnboxN { dest, .. }
            | UnboxS { dest, .. }
            | Decont { dest, .. }
            | IsConcrete { dest, .. }
            | IsType { dest, .. }
            | GetAttr { dest, .. }
            | AtPos { dest, .. }
            | Elems { dest, .. }
            | Clone { dest, .. }
            | Reset { dest, .. }
            | Control { dest, .. }
            | ContinuationInvoke { dest, .. }
            | ContinuationClone { dest, .. }
            | SpGetSlot { dest, .. }
            | SpFastInvoke { dest, .. } => Some(*dest),
            _ => None,
        }
    }

    /// The registers read by this operation.
    pub fn uses(&self) -> Vec<Reg> {
        use Opcode::*;
        match self {
            Set { src, .. }
            | UnboxI { src, .. }
            | UnboxN { src, .. }
            | UnboxS { src, .. }
            | Decont { src, .. }
            | IsConcrete { src, .. }
            | TakeClosure { src, .. }
            | Clone { src, .. }
            | ContinuationClone { src, .. }
            | Return { src }
            | BindLex { src, .. } => vec![*src],
            AddI { a, b, .. }
            | SubI { a, b, .. }
            | MulI { a, b, .. }
            | LtI { a, b, .. }
            | LeI { a, b, .. }
            | EqI { a, b, .. }
            | AddN { a, b, .. } => vec![*a, *b],
            IfI { cond, .. } | UnlessI { cond, .. } => vec![*cond],
            Dispatch { args, .. } => args.to_vec(),
            SpFastInvoke { code, args, .. } => {
                let mut regs = vec![*code];
                regs.extend(args.iter().copied());
                regs
            }
            Create { type_reg, .. } => vec![*type_reg],
            BoxI { src, type_reg, .. } | BoxN { src, type_reg, .. } | BoxS { src, type_reg, .. } => {
                vec![*src, *type_reg]
            }
            Assign { container, src } => vec![*container, *src],
            IsType { src, type_reg, .. } => vec![*src, *type_reg],
            GetAttr { obj, .. } => vec![*obj],
            BindAttr { obj, src, .. } => vec![*obj, *src],
            Push { array, src } => vec![*array, *src],
            AtPos { array, index, .. } => vec![*array, *index],
            BindPos { array, index, src } => vec![*array, *index, *src],
            Elems { array, .. } => vec![*array],
            Reset { tag, code, .. } | Control { tag, code, .. } => vec![*tag, *code],
            ContinuationInvoke { cont, value, .. } => vec![*cont, *value],
            SpGuardType { reg, .. } | SpGuardLiteralInt { reg, .. } | SpGuardLiteralObj { reg, .. } => {
                vec![*reg]
            }
            _ => Vec::new(),
        }
    }

    /// Branch target of a jump, if this is one.
    pub fn branch_target(&self) -> Option<u32> {
        match self {
            Opcode::Goto { target } | Opcode::IfI { target, .. } | Opcode::UnlessI { target, .. } => {
                Some(*target)
            }
            _ => None,
        }
    }

    /// Rewrites the branch target of a jump.
    pub fn set_branch_target(&mut self, new_target: u32) {
        match self {
            Opcode::Goto { target } | Opcode::IfI { target, .. } | Opcode::UnlessI { target, .. } => {
                *target = new_target
            }
            _ => {}
        }
    }

    /// True if control never continues to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Opcode::Goto { .. } | Opcode::Return { .. } | Opcode::ReturnVoid
        )
    }

    /// True if the operation may call into another frame.
    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            Opcode::Dispatch { .. }
                | Opcode::SpFastInvoke { .. }
                | Opcode::Reset { .. }
                | Opcode::Control { .. }
                | Opcode::ContinuationInvoke { .. }
        )
    }

    /// True if the operation can leave specialized code for the original.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Opcode::SpGuardType { .. } | Opcode::SpGuardLiteralInt { .. } | Opcode::SpGuardLiteralObj { .. }
        )
    }

    /// Applies `f` to every register operand, used when inlining renumbers a
    /// callee's registers into the caller's frame.
    pub fn map_registers(&mut self, f: &dyn Fn(Reg) -> Reg) {
        use Opcode::*;
        let m = |r: &mut Reg| *r = f(*r);
        match self {
            Noop | Goto { .. } | ReturnVoid | Safepoint | CollectGarbage { .. } => {}
            ConstI { dest, .. } | ConstN { dest, .. } | ConstS { dest, .. } | Null { dest } => m(dest),
            Param { dest, .. } | GetLex { dest, .. } | GetCode { dest, .. } | SpGetSlot { dest, .. } => {
                m(dest)
            }
            Set { dest, src }
            | UnboxI { dest, src }
            | UnboxN { dest, src }
            | UnboxS { dest, src }
            | Decont { dest, src }
            | IsConcrete { dest, src }
            | TakeClosure { dest, src }
            | Clone { dest, src }
            | ContinuationClone { dest, src } => {
                m(dest);
                m(src);
            }
            AddI { dest, a, b }
            | SubI { dest, a, b }
            | MulI { dest, a, b }
            | LtI { dest, a, b }
            | LeI { dest, a, b }
            | EqI { dest, a, b }
            | AddN { dest, a, b } => {
                m(dest);
                m(a);
                m(b);
            }
            IfI { cond, .. } | UnlessI { cond, .. } => m(cond),
            Return { src } | BindLex { src, .. } => m(src),
            Dispatch { dest, args, .. } => {
                m(dest);
                args.iter_mut().for_each(m);
            }
            SpFastInvoke { dest, code, args, .. } => {
                m(dest);
                m(code);
                args.iter_mut().for_each(m);
            }
            Create { dest, type_reg } => {
                m(dest);
                m(type_reg);
            }
            BoxI { dest, src, type_reg } | BoxN { dest, src, type_reg } | BoxS { dest, src, type_reg } => {
                m(dest);
                m(src);
                m(type_reg);
            }
            Assign { container, src } => {
                m(container);
                m(src);
            }
            IsType { dest, src, type_reg } => {
                m(dest);
                m(src);
                m(type_reg);
            }
            GetAttr { dest, obj, .. } => {
                m(dest);
                m(obj);
            }
            BindAttr { obj, src, .. } => {
                m(obj);
                m(src);
            }
            Push { array, src } => {
                m(array);
                m(src);
            }
            AtPos { dest, array, index } => {
                m(dest);
                m(array);
                m(index);
            }
            BindPos { array, index, src } => {
                m(array);
                m(index);
                m(src);
            }
            Elems { dest, array } => {
                m(dest);
                m(array);
            }
            Reset { dest, tag, code } | Control { dest, tag, code, .. } => {
                m(dest);
                m(tag);
                m(code);
            }
            ContinuationInvoke { dest, cont, value } => {
                m(dest);
                m(cont);
                m(value);
            }
            SpGuardType { reg, .. } | SpGuardLiteralInt { reg, .. } | SpGuardLiteralObj { reg, .. } => {
                m(reg)
            }
        }
    }
}
