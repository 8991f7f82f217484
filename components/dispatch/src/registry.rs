//! The dispatcher registry
//!
//! Dispatchers are looked up by string id on every cold dispatch, from any
//! thread. The table is open-addressed with linear probing and published
//! through an epoch-managed pointer: readers never lock, writers serialize
//! on a mutex and swap in a rebuilt table.

use crate::config::DispatchConfig;
use crate::program::{DispatchOutcome, Program, Temps};
use crate::recorder::{Capture, Recorder};
use core_types::{ErrorKind, ObjectInspector, VmError, VmResult};
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A dispatch or resume callback.
pub type DispatchCallback = Arc<dyn Fn(&mut Recorder<'_>) -> VmResult<()> + Send + Sync>;

/// A registered dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    id: Arc<str>,
    dispatch: DispatchCallback,
    resume: Option<DispatchCallback>,
}

impl Dispatcher {
    /// Creates a dispatcher without a resume callback.
    pub fn new(id: &str, dispatch: DispatchCallback) -> Self {
        Dispatcher {
            id: Arc::from(id),
            dispatch,
            resume: None,
        }
    }

    /// Adds a resume callback.
    pub fn with_resume(mut self, resume: DispatchCallback) -> Self {
        self.resume = Some(resume);
        self
    }

    /// Dispatcher id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True if a resume callback is present.
    pub fn has_resume(&self) -> bool {
        self.resume.is_some()
    }

    /// Runs the dispatch callback.
    pub fn dispatch(&self, recorder: &mut Recorder<'_>) -> VmResult<()> {
        (self.dispatch)(recorder)
    }

    fn same_signature(&self, other: &Dispatcher) -> bool {
        same_callback(&self.dispatch, &other.dispatch)
            && match (&self.resume, &other.resume) {
                (None, None) => true,
                (Some(a), Some(b)) => same_callback(a, b),
                _ => false,
            }
    }
}

fn same_callback(a: &DispatchCallback, b: &DispatchCallback) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("resume", &self.resume.is_some())
            .finish()
    }
}

struct Table {
    slots: Box<[Option<Arc<Dispatcher>>]>,
    len: usize,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Table {
            slots: vec![None; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    fn search(&self, id: &str) -> Result<usize, usize> {
        let mask = self.slots.len() - 1;
        let mut i = hash(id) & mask;
        loop {
            match &self.slots[i] {
                Some(d) if &*d.id == id => return Ok(i),
                Some(_) => i = (i + 1) & mask,
                None => return Err(i),
            }
        }
    }

    fn get(&self, id: &str) -> Option<&Arc<Dispatcher>> {
        self.search(id).ok().and_then(|i| self.slots[i].as_ref())
    }

    fn insert(&mut self, dispatcher: Arc<Dispatcher>) {
        if let Err(i) = self.search(&dispatcher.id) {
            self.slots[i] = Some(dispatcher);
            self.len += 1;
        }
    }

    fn needs_growth(&self) -> bool {
        (self.len + 1) * 4 > self.slots.len() * 3
    }
}

fn hash(id: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish() as usize
}

/// Registry of dispatchers.
pub struct DispatcherRegistry {
    table: Atomic<Table>,
    write_lock: Mutex<()>,
    config: DispatchConfig,
}

impl DispatcherRegistry {
    /// Creates an empty registry.
    pub fn new(config: DispatchConfig) -> Self {
        DispatcherRegistry {
            table: Atomic::new(Table::with_capacity(config.registry_capacity.max(1).next_power_of_two())),
            write_lock: Mutex::new(()),
            config,
        }
    }

    /// Creates a registry holding the boot dispatchers.
    pub fn with_boot(config: DispatchConfig) -> VmResult<Self> {
        let registry = Self::new(config);
        crate::boot::register_boot_dispatchers(&registry)?;
        Ok(registry)
    }

    /// Dispatch limits.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Registers a dispatcher. Registering the same id again with the same
    /// callbacks does nothing; different callbacks are a conflict.
    pub fn register(&self, dispatcher: Dispatcher) -> VmResult<()> {
        let _writer = self.write_lock.lock();
        let guard = epoch::pin();
        let current = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: the table is never null; writers are serialized, so
        // `current` cannot be retired while we hold the lock.
        let Some(table) = (unsafe { current.as_ref() }) else {
            return Ok(());
        };
        if let Some(existing) = table.get(&dispatcher.id) {
            if existing.same_signature(&dispatcher) {
                return Ok(());
            }
            return Err(VmError::adhoc(
                ErrorKind::DispatcherConflict,
                format!(
                    "Dispatcher '{}' is already registered with a different signature",
                    dispatcher.id
                ),
            ));
        }
        let capacity = if table.needs_growth() {
            table.slots.len() * 2
        } else {
            table.slots.len()
        };
        let mut next = Table::with_capacity(capacity);
        for d in table.slots.iter().flatten() {
            next.insert(d.clone());
        }
        if capacity != table.slots.len() {
            log::debug!("dispatcher table grown to {} slots", capacity);
        }
        log::trace!("registered dispatcher '{}'", dispatcher.id);
        next.insert(Arc::new(dispatcher));
        let old = self.table.swap(Owned::new(next), Ordering::AcqRel, &guard);
        // SAFETY: `old` is unreachable from the atomic; pinned readers
        // delay its destruction.
        unsafe { guard.defer_destroy(old) };
        Ok(())
    }

    /// Looks a dispatcher up.
    pub fn find(&self, id: &str) -> VmResult<Arc<Dispatcher>> {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: see `register`; readers are pinned while they look.
        unsafe { table.as_ref() }
            .and_then(|t| t.get(id).cloned())
            .ok_or_else(|| VmError::unknown_dispatcher(id))
    }

    /// Number of registered dispatchers.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: see `find`.
        unsafe { table.as_ref() }.map_or(0, |t| t.len)
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots in the current table.
    pub fn capacity(&self) -> usize {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: see `find`.
        unsafe { table.as_ref() }.map_or(0, |t| t.slots.len())
    }

    /// Runs the dispatcher's callback over the capture and compiles what it
    /// recorded.
    pub fn resolve(&self, capture: &Capture<'_>, inspector: &dyn ObjectInspector) -> VmResult<Program> {
        let dispatcher = self.find(capture.dispatcher)?;
        let mut recorder = Recorder::new(self, inspector, capture);
        dispatcher.dispatch(&mut recorder)?;
        recorder.finish()
    }

    /// Runs the dispatcher's resume callback. Resumptions are rare and are
    /// never cached.
    pub fn resume(&self, capture: &Capture<'_>, inspector: &dyn ObjectInspector) -> VmResult<DispatchOutcome> {
        let dispatcher = self.find(capture.dispatcher)?;
        let resume = dispatcher.resume.as_ref().ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::DispatchProtocol,
                format!("Dispatcher '{}' has no resume callback", capture.dispatcher),
            )
        })?;
        let mut recorder = Recorder::new(self, inspector, capture);
        resume(&mut recorder)?;
        let program = recorder.finish()?;
        let mut temps = Temps::new();
        program.evaluate(capture.callsite, capture.args, inspector, &mut temps)
    }
}

impl Default for DispatcherRegistry {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl Drop for DispatcherRegistry {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the table.
        unsafe {
            let guard = epoch::unprotected();
            let table = self.table.load(Ordering::Relaxed, guard);
            if !table.is_null() {
                drop(table.into_owned());
            }
        }
    }
}

impl fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
