//! Specialization candidates and their publication
//!
//! A routine's candidates and the guard tree that selects among them are
//! published together as one snapshot behind an epoch-managed pointer.
//! Frames entering the routine read the snapshot without locking; the
//! worker (installing) and deoptimizing threads (discarding) serialize on
//! a mutex and swap in a regenerated snapshot.

use crate::arg_guard::{GuardSpec, GuardTree};
use crate::spesh_log::TypeTuple;
use bytecode_system::{CallsiteId, Instruction};
use core_types::{ObjectInspector, StaticFrameId, Value, VmResult};
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A callee whose body was inlined into a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineRecord {
    /// The inlined routine
    pub routine: StaticFrameId,
    /// Original offset of the call it replaced
    pub call_offset: u32,
}

/// A specialized version of a routine.
#[derive(Debug)]
pub struct Candidate {
    id: u32,
    /// Shape it was built for
    pub callsite: CallsiteId,
    /// Argument types it assumes, `None` for a certain candidate
    pub types: Option<TypeTuple>,
    /// Specialized instructions
    pub bytecode: Arc<[Instruction]>,
    /// Deopt index to original instruction offset
    pub deopts: Arc<[u32]>,
    /// Values referenced by `SpGetSlot` and literal guards
    pub slots: Arc<[Value]>,
    /// Callees inlined into it
    pub inlines: Vec<InlineRecord>,
    /// Work registers needed to run it
    pub num_registers: u16,
    deopt_count: AtomicU32,
}

impl Candidate {
    /// Creates a candidate; its id is assigned on install.
    pub fn new(
        callsite: CallsiteId,
        types: Option<TypeTuple>,
        bytecode: Arc<[Instruction]>,
        deopts: Arc<[u32]>,
        slots: Arc<[Value]>,
        inlines: Vec<InlineRecord>,
        num_registers: u16,
    ) -> Self {
        Candidate {
            id: 0,
            callsite,
            types,
            bytecode,
            deopts,
            slots,
            inlines,
            num_registers,
            deopt_count: AtomicU32::new(0),
        }
    }

    /// Id unique within the routine.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Deopts taken so far.
    pub fn deopt_count(&self) -> u32 {
        self.deopt_count.load(Ordering::Relaxed)
    }

    fn spec(&self) -> GuardSpec<'_> {
        GuardSpec {
            callsite: self.callsite,
            types: self.types.as_deref(),
        }
    }
}

struct Snapshot {
    candidates: Vec<Arc<Candidate>>,
    tree: GuardTree,
}

/// Candidates of one routine plus the guard tree selecting them.
pub struct SpeshState {
    snapshot: Atomic<Snapshot>,
    write_lock: Mutex<u32>,
}

impl SpeshState {
    /// No candidates.
    pub fn new() -> Self {
        SpeshState {
            snapshot: Atomic::new(Snapshot {
                candidates: Vec::new(),
                tree: GuardTree::empty(),
            }),
            write_lock: Mutex::new(1),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Option<R> {
        let guard = epoch::pin();
        let current = self.snapshot.load(Ordering::Acquire, &guard);
        // SAFETY: snapshots are destroyed only through `defer_destroy` after
        // being replaced, so one loaded under `guard` stays valid here.
        unsafe { current.as_ref() }.map(f)
    }

    /// The candidate for a call, if any applies.
    pub fn select(
        &self,
        callsite: CallsiteId,
        args: &[Value],
        inspector: &dyn ObjectInspector,
    ) -> Option<Arc<Candidate>> {
        self.read(|snap| {
            let index = snap.tree.run(callsite, args, inspector)?;
            snap.candidates.get(index as usize).cloned()
        })
        .flatten()
    }

    /// Installed candidates.
    pub fn candidates(&self) -> Vec<Arc<Candidate>> {
        self.read(|snap| snap.candidates.clone()).unwrap_or_default()
    }

    /// Number of installed candidates.
    pub fn len(&self) -> usize {
        self.read(|snap| snap.candidates.len()).unwrap_or(0)
    }

    /// True if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if an installed candidate would be selected for exactly this
    /// shape and type tuple.
    pub fn covers(&self, callsite: CallsiteId, types: Option<&TypeTuple>) -> bool {
        self.read(|snap| {
            snap.tree
                .run_types(callsite, types.map(|t| &t[..]))
                .and_then(|i| snap.candidates.get(i as usize))
                .is_some_and(|c| c.types.as_ref() == types)
        })
        .unwrap_or(false)
    }

    fn publish(&self, candidates: Vec<Arc<Candidate>>) -> VmResult<()> {
        let specs: Vec<GuardSpec<'_>> = candidates.iter().map(|c| c.spec()).collect();
        let tree = GuardTree::build(&specs)?;
        drop(specs);
        let guard = epoch::pin();
        let old = self
            .snapshot
            .swap(Owned::new(Snapshot { candidates, tree }), Ordering::AcqRel, &guard);
        if !old.is_null() {
            // SAFETY: `old` is unreachable from the atomic; pinned readers
            // delay its destruction.
            unsafe { guard.defer_destroy(old) };
        }
        Ok(())
    }

    /// Adds a candidate and republishes the guard tree. Returns its id.
    pub fn install(&self, mut candidate: Candidate, max_candidates: usize) -> VmResult<Option<u32>> {
        let mut next_id = self.write_lock.lock();
        let mut candidates = self.candidates();
        if candidates.len() >= max_candidates {
            log::debug!("routine already has {} candidates; not installing", candidates.len());
            return Ok(None);
        }
        candidate.id = *next_id;
        let id = candidate.id;
        candidates.push(Arc::new(candidate));
        self.publish(candidates)?;
        *next_id += 1;
        Ok(Some(id))
    }

    /// Counts a deopt of candidate `id`; once it reaches `max_deopts` the
    /// candidate is removed. Returns true if it was removed.
    pub fn record_deopt(&self, id: u32, max_deopts: u32) -> bool {
        let Some(candidate) = self
            .read(|snap| snap.candidates.iter().find(|c| c.id == id).cloned())
            .flatten()
        else {
            return false;
        };
        let count = candidate.deopt_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count < max_deopts {
            return false;
        }
        let _writer = self.write_lock.lock();
        let mut candidates = self.candidates();
        let before = candidates.len();
        candidates.retain(|c| c.id != id);
        if candidates.len() == before {
            return false;
        }
        match self.publish(candidates) {
            Ok(()) => {
                log::warn!("discarded specialization {} after {} deopts", id, count);
                true
            }
            Err(e) => {
                log::warn!("could not discard specialization {}: {}", id, e);
                false
            }
        }
    }

    /// Every value referenced by an installed candidate.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        let guard = epoch::pin();
        let current = self.snapshot.load(Ordering::Acquire, &guard);
        // SAFETY: see `read`.
        if let Some(snap) = unsafe { current.as_ref() } {
            for candidate in &snap.candidates {
                candidate.slots.iter().for_each(&mut *f);
            }
        }
    }
}

impl Default for SpeshState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpeshState {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the snapshot.
        unsafe {
            let guard = epoch::unprotected();
            let snap = self.snapshot.load(Ordering::Relaxed, guard);
            if !snap.is_null() {
                drop(snap.into_owned());
            }
        }
    }
}

impl std::fmt::Debug for SpeshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeshState").field("candidates", &self.len()).finish()
    }
}
