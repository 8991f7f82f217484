//! Inline caches for dispatch instructions
//!
//! Every `dispatch` instruction of a routine owns one slot. A slot starts
//! unlinked, holds one program once resolved, then up to
//! `max_polymorphism` programs, newest first. Past that the site is
//! megamorphic: misses resolve every time and nothing more is installed.
//!
//! Slots change by compare-and-swap on an epoch-managed pointer. A thread
//! that loses the race drops the entry it built; the winner retires the
//! superseded entry, which is freed once no thread still runs through it.

use crate::program::{DispatchOutcome, Program, Temps};
use crate::recorder::Capture;
use crate::registry::DispatcherRegistry;
use arrayvec::ArrayVec;
use core_types::{ErrorKind, ObjectInspector, Value, VmError, VmResult};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Upper bound on programs per slot.
pub const MAX_POLYMORPHISM: usize = 8;

enum CacheEntry {
    Monomorphic(Arc<Program>),
    Polymorphic(ArrayVec<Arc<Program>, MAX_POLYMORPHISM>),
}

impl CacheEntry {
    fn programs(&self) -> &[Arc<Program>] {
        match self {
            CacheEntry::Monomorphic(p) => std::slice::from_ref(p),
            CacheEntry::Polymorphic(list) => list.as_slice(),
        }
    }
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never resolved
    Unlinked,
    /// One program
    Monomorphic,
    /// Several programs
    Polymorphic(usize),
}

/// Result of a dispatch through the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// What to do with the call
    pub outcome: DispatchOutcome,
    /// Id of the program that produced it
    pub program: u64,
    /// False if the resolver had to run
    pub hit: bool,
}

/// The inline cache slots of one routine.
pub struct InlineCache {
    slots: Box<[Atomic<CacheEntry>]>,
    max_polymorphism: usize,
}

impl InlineCache {
    /// Creates `num_slots` unlinked slots.
    pub fn new(num_slots: usize, max_polymorphism: usize) -> Self {
        InlineCache {
            slots: (0..num_slots).map(|_| Atomic::null()).collect(),
            max_polymorphism: max_polymorphism.clamp(1, MAX_POLYMORPHISM),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the routine has no dispatch instructions.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: usize) -> VmResult<&Atomic<CacheEntry>> {
        self.slots.get(index).ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::Bytecode,
                format!("Inline cache slot {} out of range ({} slots)", index, self.slots.len()),
            )
        })
    }

    fn load<'g>(&self, index: usize, guard: &'g Guard) -> Option<&'g CacheEntry> {
        let entry = self.slots.get(index)?.load(Ordering::Acquire, guard);
        // SAFETY: entries are only destroyed through `defer_destroy` after
        // being unlinked, so one loaded under `guard` outlives it.
        unsafe { entry.as_ref() }
    }

    /// State of a slot.
    pub fn state(&self, index: usize) -> CacheState {
        let guard = epoch::pin();
        match self.load(index, &guard) {
            None => CacheState::Unlinked,
            Some(CacheEntry::Monomorphic(_)) => CacheState::Monomorphic,
            Some(CacheEntry::Polymorphic(list)) => CacheState::Polymorphic(list.len()),
        }
    }

    /// Programs installed in a slot, newest first.
    pub fn programs(&self, index: usize) -> Vec<Arc<Program>> {
        let guard = epoch::pin();
        self.load(index, &guard)
            .map(|entry| entry.programs().to_vec())
            .unwrap_or_default()
    }

    /// The program of a monomorphic slot.
    pub fn monomorphic(&self, index: usize) -> Option<Arc<Program>> {
        let guard = epoch::pin();
        match self.load(index, &guard) {
            Some(CacheEntry::Monomorphic(p)) => Some(p.clone()),
            _ => None,
        }
    }

    /// Dispatches through slot `index`: runs the installed programs, and on
    /// a miss resolves the capture and installs the new program.
    pub fn dispatch(
        &self,
        index: usize,
        registry: &DispatcherRegistry,
        capture: &Capture<'_>,
        inspector: &dyn ObjectInspector,
        temps: &mut Temps,
    ) -> VmResult<Dispatched> {
        let slot = self.slot(index)?;
        {
            let guard = epoch::pin();
            if let Some(entry) = self.load(index, &guard) {
                for program in entry.programs() {
                    if let Some(outcome) = program.run(capture.callsite, capture.args, inspector, temps) {
                        return Ok(Dispatched {
                            outcome: outcome.resolve(capture.args, temps)?,
                            program: program.id(),
                            hit: true,
                        });
                    }
                }
            }
        }

        let program = Arc::new(registry.resolve(capture, inspector)?);
        let outcome = program.evaluate(capture.callsite, capture.args, inspector, temps)?;
        let id = program.id();
        self.install(slot, program, capture, inspector);
        Ok(Dispatched {
            outcome,
            program: id,
            hit: false,
        })
    }

    fn install(
        &self,
        slot: &Atomic<CacheEntry>,
        program: Arc<Program>,
        capture: &Capture<'_>,
        inspector: &dyn ObjectInspector,
    ) {
        let guard = epoch::pin();
        let mut current = slot.load(Ordering::Acquire, &guard);
        let mut scratch = Temps::new();
        loop {
            // SAFETY: see `load`.
            let existing = unsafe { current.as_ref() };
            if let Some(entry) = existing {
                let covered = entry.programs().iter().any(|p| {
                    p.run(capture.callsite, capture.args, inspector, &mut scratch)
                        .is_some()
                });
                if covered {
                    // Another thread installed an equivalent program first
                    return;
                }
            }
            let next = match existing {
                None => CacheEntry::Monomorphic(program.clone()),
                Some(entry) => {
                    let programs = entry.programs();
                    if programs.len() >= self.max_polymorphism {
                        log::trace!(
                            "inline cache for '{}' is megamorphic",
                            program.dispatcher()
                        );
                        return;
                    }
                    let mut list = ArrayVec::new();
                    list.push(program.clone());
                    for p in programs {
                        if list.try_push(p.clone()).is_err() {
                            break;
                        }
                    }
                    CacheEntry::Polymorphic(list)
                }
            };
            match slot.compare_exchange(current, Owned::new(next), Ordering::AcqRel, Ordering::Acquire, &guard) {
                Ok(_) => {
                    log::trace!(
                        "inline cache for '{}' now holds {} program(s)",
                        program.dispatcher(),
                        existing.map_or(1, |e| e.programs().len() + 1)
                    );
                    retire(current, &guard);
                    return;
                }
                Err(lost) => current = lost.current,
            }
        }
    }

    /// Every value held by an installed program.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        let guard = epoch::pin();
        for index in 0..self.slots.len() {
            if let Some(entry) = self.load(index, &guard) {
                for program in entry.programs() {
                    program.visit_values(f);
                }
            }
        }
    }
}

fn retire(entry: Shared<'_, CacheEntry>, guard: &Guard) {
    if !entry.is_null() {
        // SAFETY: `entry` was just unlinked by a successful CAS; threads
        // still reading it are pinned.
        unsafe { guard.defer_destroy(entry) };
    }
}

impl Drop for InlineCache {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the slots.
        unsafe {
            let guard = epoch::unprotected();
            for slot in self.slots.iter() {
                let entry = slot.load(Ordering::Relaxed, guard);
                if !entry.is_null() {
                    drop(entry.into_owned());
                }
            }
        }
    }
}

impl std::fmt::Debug for InlineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineCache")
            .field("slots", &self.slots.len())
            .field("max_polymorphism", &self.max_polymorphism)
            .finish()
    }
}
