//! Shared fixtures

use bytecode_system::{ArgFlag, Callsite, CallsiteId, CallsiteInterner, FrameBody};
use core_types::{ObjRef, ObjectInspector, StableId, StaticFrameId, Value};
use dispatch::{Capture, DispatcherRegistry, Temps};
use parking_lot::Mutex;
use specializer::{Routine, SpeshHost};
use std::collections::HashMap;
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Routines, code objects and typed objects without a real heap.
#[derive(Default)]
pub struct FakeVm {
    routines: Mutex<HashMap<StaticFrameId, Arc<Routine>>>,
    codes: Mutex<HashMap<ObjRef, StaticFrameId>>,
    types: Mutex<HashMap<ObjRef, (StableId, bool)>>,
    pub callsites: CallsiteInterner,
}

impl FakeVm {
    pub fn new() -> Self {
        init_logging();
        Self::default()
    }

    pub fn add_routine(&self, id: u32, body: FrameBody) -> Arc<Routine> {
        let routine = Arc::new(Routine::new(StaticFrameId(id), body, 8).unwrap());
        self.routines.lock().insert(StaticFrameId(id), routine.clone());
        routine
    }

    pub fn add_code(&self, index: u32, routine: u32) -> ObjRef {
        let obj = ObjRef::from_index(index);
        self.codes.lock().insert(obj, StaticFrameId(routine));
        self.types.lock().insert(obj, (StableId(1), true));
        obj
    }

    pub fn add_object(&self, index: u32, stable: u32, concrete: bool) -> ObjRef {
        let obj = ObjRef::from_index(index);
        self.types.lock().insert(obj, (StableId(stable), concrete));
        obj
    }

    /// Runs one dispatch through a routine's cache slot to warm it.
    pub fn warm(
        &self,
        routine: &Routine,
        slot: usize,
        registry: &DispatcherRegistry,
        dispatcher: &str,
        callsite: CallsiteId,
        args: &[Value],
    ) -> u64 {
        let capture = Capture {
            dispatcher,
            callsite,
            args,
        };
        routine
            .caches()
            .dispatch(slot, registry, &capture, self, &mut Temps::new())
            .unwrap()
            .program
    }
}

impl SpeshHost for FakeVm {
    fn routine(&self, id: StaticFrameId) -> Option<Arc<Routine>> {
        self.routines.lock().get(&id).cloned()
    }

    fn code_routine(&self, code: ObjRef) -> Option<StaticFrameId> {
        self.codes.lock().get(&code).copied()
    }

    fn type_of(&self, obj: ObjRef) -> Option<(StableId, bool)> {
        self.types.lock().get(&obj).copied()
    }

    fn intern_callsite(&self, flags: &[ArgFlag]) -> CallsiteId {
        self.callsites.intern(flags)
    }

    fn callsite(&self, id: CallsiteId) -> Option<Arc<Callsite>> {
        self.callsites.get(id)
    }
}

impl ObjectInspector for FakeVm {
    fn stable_of(&self, obj: ObjRef) -> Option<StableId> {
        self.type_of(obj).map(|t| t.0)
    }

    fn is_concrete(&self, obj: ObjRef) -> bool {
        self.type_of(obj).is_some_and(|t| t.1)
    }

    fn decont(&self, _obj: ObjRef) -> Option<Value> {
        None
    }

    fn is_rw_container(&self, _obj: ObjRef) -> bool {
        false
    }
}
