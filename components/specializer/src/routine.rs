//! Routines as the specializer sees them
//!
//! A routine couples a validated frame body with the state that grows as
//! it runs: one inline cache slot per dispatch instruction and the spesh
//! candidates selected at entry.

use crate::candidate::SpeshState;
use bytecode_system::{ArgFlag, Callsite, CallsiteId, FrameBody, Instruction};
use core_types::{ObjRef, StableId, StaticFrameId, Value, VmResult};
use dispatch::InlineCache;
use std::sync::Arc;

/// A routine's code and its runtime caches.
#[derive(Debug)]
pub struct Routine {
    id: StaticFrameId,
    body: FrameBody,
    bytecode: Arc<[Instruction]>,
    caches: InlineCache,
    spesh: SpeshState,
}

impl Routine {
    /// Validates `body` and wraps it.
    pub fn new(id: StaticFrameId, body: FrameBody, max_polymorphism: usize) -> VmResult<Self> {
        body.validate()?;
        let bytecode: Arc<[Instruction]> = body.instructions.clone().into();
        let caches = InlineCache::new(body.num_cache_slots as usize, max_polymorphism);
        Ok(Routine {
            id,
            body,
            bytecode,
            caches,
            spesh: SpeshState::new(),
        })
    }

    /// Static frame id.
    pub fn id(&self) -> StaticFrameId {
        self.id
    }

    /// Frame body as loaded.
    pub fn body(&self) -> &FrameBody {
        &self.body
    }

    /// The original instructions, shared with frames running them.
    pub fn bytecode(&self) -> &Arc<[Instruction]> {
        &self.bytecode
    }

    /// Dispatch inline caches.
    pub fn caches(&self) -> &InlineCache {
        &self.caches
    }

    /// Spesh candidates.
    pub fn spesh(&self) -> &SpeshState {
        &self.spesh
    }

    /// Every value a collector must treat as a root.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        self.caches.visit_values(f);
        self.spesh.visit_values(f);
    }
}

/// What the specializer needs from the VM it runs in.
pub trait SpeshHost: Send + Sync {
    /// A routine by id.
    fn routine(&self, id: StaticFrameId) -> Option<Arc<Routine>>;

    /// The routine a code object runs, if `code` is one.
    fn code_routine(&self, code: ObjRef) -> Option<StaticFrameId>;

    /// STable and concreteness of an object.
    fn type_of(&self, obj: ObjRef) -> Option<(StableId, bool)>;

    /// Interns a callsite shape.
    fn intern_callsite(&self, flags: &[ArgFlag]) -> CallsiteId;

    /// A callsite shape by id.
    fn callsite(&self, id: CallsiteId) -> Option<Arc<Callsite>>;
}
