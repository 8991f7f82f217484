//! The VM instance
//!
//! One instance owns the heap, the type registries, the dispatcher
//! registry, every loaded routine and the spesh worker. Threads attach to
//! it to get a [`ThreadContext`]; everything they share lives in one
//! shared state, which is also what the spesh worker sees as its host.

use crate::config::VmConfig;
use crate::thread::ThreadContext;
use bytecode_system::{ArgFlag, Callsite, CallsiteId, CallsiteInterner, FrameBody, Opcode};
use core_types::{ErrorKind, ObjRef, StableId, StaticFrameId, ThreadId, Value, VmError, VmResult};
use dispatch::{Dispatcher, DispatcherRegistry};
use memory_manager::{
    ArraySlotType, ComposeInfo, Heap, InvocationHandler, Orchestrator, ReprRegistry, STable, STableRegistry,
};
use parking_lot::{Mutex, RwLock};
use specializer::{Routine, SpeshHost, SpeshWorker};
use std::sync::Arc;

/// The STables every instance creates at startup.
#[derive(Debug, Clone)]
pub struct CoreTypes {
    /// Boxed native integer
    pub int: Arc<STable>,
    /// Boxed native float
    pub num: Arc<STable>,
    /// Boxed string
    pub str: Arc<STable>,
    /// Boxed big integer
    pub bigint: Arc<STable>,
    /// Array of values
    pub array: Arc<STable>,
    /// Read-write scalar container
    pub scalar: Arc<STable>,
    /// Code objects
    pub code: Arc<STable>,
    /// Heap frames of promoted and closed-over frames
    pub frame: Arc<STable>,
    /// Continuations
    pub continuation: Arc<STable>,
}

impl CoreTypes {
    fn create(reprs: &ReprRegistry, stables: &STableRegistry) -> VmResult<Self> {
        let array = stables.create("Array", reprs.lookup("VMArray")?);
        array.compose(&ComposeInfo {
            array_type: Some(ArraySlotType::Obj),
            ..Default::default()
        })?;
        let code = stables.create("Code", reprs.lookup("MVMCode")?);
        code.set_invocation(InvocationHandler::Code);
        Ok(CoreTypes {
            int: stables.create("Int", reprs.lookup("P6int")?),
            num: stables.create("Num", reprs.lookup("P6num")?),
            str: stables.create("Str", reprs.lookup("P6str")?),
            bigint: stables.create("BigInt", reprs.lookup("P6bigint")?),
            array,
            scalar: stables.create("Scalar", reprs.lookup("Scalar")?),
            code,
            frame: stables.create("Frame", reprs.lookup("MVMFrame")?),
            continuation: stables.create("Continuation", reprs.lookup("MVMContinuation")?),
        })
    }
}

/// State shared by every thread of an instance and by its spesh worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: VmConfig,
    pub(crate) heap: Heap,
    pub(crate) orchestrator: Orchestrator,
    pub(crate) reprs: ReprRegistry,
    pub(crate) stables: STableRegistry,
    pub(crate) types: CoreTypes,
    pub(crate) dispatchers: DispatcherRegistry,
    pub(crate) callsites: CallsiteInterner,
    routines: RwLock<Vec<Loaded>>,
}

#[derive(Debug)]
struct Loaded {
    routine: Arc<Routine>,
    code: ObjRef,
    /// Closures capture its frames, so they start on the heap
    heap_env: bool,
}

impl Shared {
    fn loaded<R>(&self, id: StaticFrameId, f: impl FnOnce(&Loaded) -> R) -> VmResult<R> {
        self.routines
            .read()
            .get(id.0 as usize)
            .map(f)
            .ok_or_else(|| VmError::adhoc(ErrorKind::Bytecode, format!("No routine with id {}", id.0)))
    }

    pub(crate) fn routine(&self, id: StaticFrameId) -> VmResult<Arc<Routine>> {
        self.loaded(id, |l| l.routine.clone())
    }

    /// A routine and whether its frames start on the heap.
    pub(crate) fn entry(&self, id: StaticFrameId) -> VmResult<(Arc<Routine>, bool)> {
        self.loaded(id, |l| (l.routine.clone(), l.heap_env))
    }

    pub(crate) fn static_code(&self, id: StaticFrameId) -> VmResult<ObjRef> {
        self.loaded(id, |l| l.code)
    }

    /// Values every collection must keep alive besides thread roots.
    pub(crate) fn global_roots(&self) -> Vec<ObjRef> {
        let mut roots = Vec::new();
        for loaded in self.routines.read().iter() {
            loaded.routine.visit_values(&mut |v| {
                if let Value::Obj(obj) = v {
                    roots.push(*obj);
                }
            });
        }
        roots
    }
}

impl SpeshHost for Shared {
    fn routine(&self, id: StaticFrameId) -> Option<Arc<Routine>> {
        self.routines.read().get(id.0 as usize).map(|l| l.routine.clone())
    }

    fn code_routine(&self, code: ObjRef) -> Option<StaticFrameId> {
        self.heap.code(code).ok().map(|c| c.static_frame)
    }

    fn type_of(&self, obj: ObjRef) -> Option<(StableId, bool)> {
        self.heap.object(obj).map(|o| (o.stable.id(), o.is_concrete()))
    }

    fn intern_callsite(&self, flags: &[ArgFlag]) -> CallsiteId {
        self.callsites.intern(flags)
    }

    fn callsite(&self, id: CallsiteId) -> Option<Arc<Callsite>> {
        self.callsites.get(id)
    }
}

/// A running VM.
///
/// # Example
///
/// ```
/// use bytecode_system::{FrameBody, Opcode, Reg};
/// use core_types::Value;
/// use interpreter::{VmConfig, VmInstance};
///
/// let vm = VmInstance::new(VmConfig::default()).unwrap();
/// let mut body = FrameBody::new("answer").with_registers(1);
/// body.emit(Opcode::ConstI { dest: Reg(0), value: 42 });
/// body.emit(Opcode::Return { src: Reg(0) });
/// let id = vm.add_routine(body).unwrap();
///
/// let mut tc = vm.attach().unwrap();
/// assert_eq!(tc.call_routine(id, &[]).unwrap(), Value::Int(42));
/// ```
#[derive(Debug)]
pub struct VmInstance {
    shared: Arc<Shared>,
    worker: Mutex<Option<SpeshWorker>>,
}

impl VmInstance {
    /// Boots an instance: registries, core types, boot dispatchers and,
    /// if specialization is on, the spesh worker.
    pub fn new(config: VmConfig) -> VmResult<Self> {
        config.validate()?;
        let reprs = ReprRegistry::with_builtins();
        let stables = STableRegistry::new();
        let types = CoreTypes::create(&reprs, &stables)?;
        let dispatchers = DispatcherRegistry::with_boot(config.dispatch.clone())?;
        let shared = Arc::new(Shared {
            heap: Heap::new(config.heap.clone()),
            orchestrator: Orchestrator::new(),
            reprs,
            stables,
            types,
            dispatchers,
            callsites: CallsiteInterner::new(),
            routines: RwLock::new(Vec::new()),
            config,
        });
        let worker = if shared.config.spesh.enabled {
            let host: Arc<dyn SpeshHost> = shared.clone();
            Some(SpeshWorker::spawn(host, shared.config.spesh.clone())?)
        } else {
            None
        };
        log::info!(
            "VM instance started (spesh {})",
            if worker.is_some() { "on" } else { "off" }
        );
        Ok(VmInstance {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &VmConfig {
        &self.shared.config
    }

    /// The core STables.
    pub fn types(&self) -> &CoreTypes {
        &self.shared.types
    }

    /// The dispatcher registry.
    pub fn dispatchers(&self) -> &DispatcherRegistry {
        &self.shared.dispatchers
    }

    /// The collection coordinator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.shared.orchestrator
    }

    /// The REPR registry, for registering extra REPRs.
    pub fn reprs(&self) -> &ReprRegistry {
        &self.shared.reprs
    }

    /// Registers a dispatcher.
    pub fn register_dispatcher(&self, dispatcher: Dispatcher) -> VmResult<()> {
        self.shared.dispatchers.register(dispatcher)
    }

    /// Interns a callsite shape for bytecode being built.
    pub fn intern_callsite(&self, flags: &[ArgFlag]) -> CallsiteId {
        self.shared.callsites.intern(flags)
    }

    /// Loads a routine and creates its static code object.
    ///
    /// # Arguments
    ///
    /// * `body` - Validated before it is accepted
    ///
    /// # Returns
    ///
    /// The id `GetCode` and [`ThreadContext::call_routine`] refer to it by.
    pub fn add_routine(&self, body: FrameBody) -> VmResult<StaticFrameId> {
        let mut routines = self.shared.routines.write();
        let id = StaticFrameId(routines.len() as u32);
        if let Some(outer) = body.outer {
            if outer.0 as usize >= routines.len() {
                return Err(VmError::adhoc(
                    ErrorKind::Bytecode,
                    format!("Routine '{}' names unknown outer {}", body.name, outer.0),
                ));
            }
        }
        let name = body.name.clone();
        let heap_env = body
            .instructions
            .iter()
            .any(|i| matches!(i.opcode, Opcode::TakeClosure { .. }));
        let routine = Arc::new(Routine::new(id, body, self.shared.config.dispatch.max_polymorphism)?);
        let heap = &self.shared.heap;
        let code = heap.new_code(ThreadId(0), &self.shared.types.code, id, &name, None)?;
        heap.add_permanent_root(code);
        routines.push(Loaded {
            routine,
            code,
            heap_env,
        });
        log::debug!("loaded routine '{}' as {}", name, id.0);
        Ok(id)
    }

    /// A loaded routine.
    pub fn routine(&self, id: StaticFrameId) -> VmResult<Arc<Routine>> {
        self.shared.routine(id)
    }

    /// The static code object of a routine.
    pub fn static_code(&self, id: StaticFrameId) -> VmResult<ObjRef> {
        self.shared.static_code(id)
    }

    /// Creates a type with a built-in or registered REPR and returns its
    /// type object.
    pub fn new_type(&self, name: &str, repr: &str, compose: Option<&ComposeInfo>) -> VmResult<ObjRef> {
        let st = self.shared.stables.create(name, self.shared.reprs.lookup(repr)?);
        if let Some(info) = compose {
            st.compose(info)?;
        }
        Ok(self.shared.heap.type_object(&st))
    }

    /// The STable behind a type id.
    pub fn stable(&self, id: StableId) -> Option<Arc<STable>> {
        self.shared.stables.get(id)
    }

    /// The type object of an STable.
    pub fn type_object(&self, st: &Arc<STable>) -> ObjRef {
        self.shared.heap.type_object(st)
    }

    /// Runs `f` against the heap. Nothing is locked for the duration; each
    /// heap operation takes only the locks it needs.
    pub fn with_heap<R>(&self, f: impl FnOnce(&Heap) -> R) -> R {
        f(&self.shared.heap)
    }

    /// Attaches the calling thread.
    pub fn attach(&self) -> VmResult<ThreadContext> {
        let sender = self.worker.lock().as_ref().map(SpeshWorker::sender);
        ThreadContext::new(self.shared.clone(), sender)
    }

    /// Stops the spesh worker. Threads keep running unspecialized.
    pub fn shutdown_spesh(&self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.shutdown();
        }
    }
}

impl Drop for VmInstance {
    fn drop(&mut self) {
        self.shutdown_spesh();
        log::info!("VM instance stopped");
    }
}
