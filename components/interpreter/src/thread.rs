//! Per-thread execution context
//!
//! A `ThreadContext` is what a thread gets when it attaches to an instance:
//! its own call stack, its spesh log and its slot in the collection
//! orchestrator. Between calls the thread is parked as blocked, so rounds
//! started by other threads collect on its behalf instead of waiting for
//! it.

use crate::instance::Shared;
use crate::roots::thread_roots;
use callstack::{CallStack, ReturnTarget};
use core_types::{ObjRef, StaticFrameId, ThreadId, Value, VmResult};
use crossbeam::channel::Sender;
use dispatch::Temps;
use memory_manager::{CollectionKind, GcReport, Heap, ThreadSlot};
use specializer::{SpeshLog, WorkerMessage};
use std::sync::Arc;

/// What a collection coordinated by this thread did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcSummary {
    /// Coordinating thread
    pub coordinator: ThreadId,
    /// Threads that stopped at a safepoint and voted
    pub interrupted: Vec<ThreadId>,
    /// Blocked threads collected for
    pub stolen: Vec<ThreadId>,
    /// What the heap reported
    pub report: GcReport,
}

/// Execution state of one attached thread.
pub struct ThreadContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) slot: Arc<ThreadSlot>,
    pub(crate) stack: CallStack,
    pub(crate) spesh_log: Option<SpeshLog>,
    pub(crate) temps: Temps,
    pub(crate) host_roots: Vec<Value>,
    pub(crate) gc_wanted: Option<CollectionKind>,
    pub(crate) last_gc: Option<GcSummary>,
}

impl ThreadContext {
    pub(crate) fn new(shared: Arc<Shared>, sender: Option<Sender<WorkerMessage>>) -> VmResult<Self> {
        let slot = shared.orchestrator.register();
        shared.orchestrator.park(&slot, Vec::new());
        shared.heap.ensure_thread(slot.id());
        let spesh = &shared.config.spesh;
        let spesh_log = sender.map(|s| SpeshLog::new(slot.id(), spesh.log_size, spesh.blocking, s));
        log::info!("thread {} attached", slot.id().0);
        Ok(ThreadContext {
            shared,
            slot,
            stack: CallStack::new(),
            spesh_log,
            temps: Temps::new(),
            host_roots: Vec::new(),
            gc_wanted: None,
            last_gc: None,
        })
    }

    /// Thread id within the instance.
    pub fn id(&self) -> ThreadId {
        self.slot.id()
    }

    /// Number of frames on the call stack.
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Invokes a code object and runs until it returns.
    ///
    /// # Arguments
    ///
    /// * `code` - A code object, or an object whose type has an invocation
    ///   handler
    /// * `args` - Positional arguments
    ///
    /// # Returns
    ///
    /// The returned value. Objects in it are not rooted once this returns;
    /// use [`ThreadContext::push_root`] to keep them across collections.
    pub fn call(&mut self, code: ObjRef, args: &[Value]) -> VmResult<Value> {
        self.shared.orchestrator.unpark(&self.slot);
        let result = self
            .invoke(code, args.to_vec(), None, ReturnTarget::Host)
            .and_then(|()| self.run());
        if let Err(e) = &result {
            log::debug!("thread {} unwinding after error: {}", self.id().0, e);
            self.unwind();
        }
        self.park();
        result
    }

    /// Invokes the static code object of a routine.
    pub fn call_routine(&mut self, routine: StaticFrameId, args: &[Value]) -> VmResult<Value> {
        let code = self.shared.static_code(routine)?;
        self.call(code, args)
    }

    /// Keeps a value alive across collections until popped.
    pub fn push_root(&mut self, value: Value) {
        self.host_roots.push(value);
        self.republish();
    }

    /// Drops the `n` newest host roots.
    pub fn pop_roots(&mut self, n: usize) {
        let keep = self.host_roots.len().saturating_sub(n);
        self.host_roots.truncate(keep);
        self.republish();
    }

    /// Runs `f` against the heap with this thread's id, for hosts that
    /// build objects to pass in. Allocations land in this thread's nursery.
    pub fn with_heap<R>(&self, f: impl FnOnce(&Heap, ThreadId) -> R) -> R {
        f(&self.shared.heap, self.id())
    }

    /// Runs a collection now, coordinating it unless another thread already
    /// is.
    ///
    /// # Returns
    ///
    /// What the round did if this thread coordinated it.
    pub fn collect_garbage(&mut self, full: bool) -> Option<GcSummary> {
        self.shared.orchestrator.unpark(&self.slot);
        let kind = if full { CollectionKind::Full } else { CollectionKind::Minor };
        self.collect(kind);
        self.park();
        self.last_gc.take()
    }

    /// Sends pending spesh log entries to the worker.
    pub fn flush_spesh_log(&mut self) {
        if self.spesh_log.is_none() {
            return;
        }
        let roots = thread_roots(&self.stack, &self.host_roots);
        let _blocked = self.shared.orchestrator.block(&self.slot, roots);
        if let Some(log) = self.spesh_log.as_mut() {
            log.flush();
        }
    }

    fn park(&mut self) {
        let roots = thread_roots(&self.stack, &self.host_roots);
        self.shared.orchestrator.park(&self.slot, roots);
    }

    fn republish(&mut self) {
        // Parking an idle thread again only refreshes its published roots
        self.park();
    }

    /// Polls for a round started by another thread.
    pub(crate) fn safepoint(&mut self) {
        let stack = &self.stack;
        let host_roots = &self.host_roots;
        self.shared
            .orchestrator
            .safepoint(&self.slot, &mut || thread_roots(stack, host_roots));
    }

    /// Drops every record up to and including the frame the host invoked.
    fn unwind(&mut self) {
        while let Some(record) = self.stack.pop() {
            if record.frame_state().is_some_and(|s| s.return_to == ReturnTarget::Host) {
                return;
            }
        }
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("id", &self.id())
            .field("depth", &self.stack.depth())
            .field("host_roots", &self.host_roots.len())
            .finish()
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        if let Some(log) = self.spesh_log.as_mut() {
            log.flush();
        }
        self.stack.clear();
        self.shared.orchestrator.unregister(&self.slot);
        log::info!("thread {} detached", self.id().0);
    }
}
