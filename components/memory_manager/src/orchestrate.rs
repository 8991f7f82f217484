//! Stop-the-world coordination
//!
//! A collection needs every mutator of the instance to be stopped. Each
//! registered thread has a status word:
//!
//! - `None`: running normally
//! - `Interrupt`: a coordinator asked it to stop at its next safepoint
//! - `Unable`: blocked outside VM code (I/O, a lock) and cannot answer
//! - `Stolen`: blocked, and a coordinator is collecting on its behalf
//!
//! The first thread to claim the round becomes the coordinator. It flips
//! running threads to `Interrupt` and blocked ones to `Stolen`, waits until
//! every interrupted thread has published its roots and voted, runs the
//! collection, then releases everyone. A blocked thread that comes back
//! while stolen waits for the round to finish before touching the heap.

use core_types::{ObjRef, ThreadId};
use crossbeam::atomic::AtomicCell;
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-thread collection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStatus {
    /// Running
    None,
    /// Asked to stop at the next safepoint
    Interrupt,
    /// Blocked outside VM code
    Unable,
    /// Blocked, collected for by another thread
    Stolen,
}

/// A registered mutator thread.
#[derive(Debug)]
pub struct ThreadSlot {
    id: ThreadId,
    status: AtomicCell<GcStatus>,
    roots: Mutex<Vec<ObjRef>>,
}

impl ThreadSlot {
    fn new(id: ThreadId) -> Self {
        ThreadSlot {
            id,
            status: AtomicCell::new(GcStatus::None),
            roots: Mutex::new(Vec::new()),
        }
    }

    /// Thread id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> GcStatus {
        self.status.load()
    }

    fn transition(&self, from: GcStatus, to: GcStatus) -> Result<(), GcStatus> {
        self.status.compare_exchange(from, to).map(|_| ())
    }

    fn publish_roots(&self, roots: Vec<ObjRef>) {
        *self.roots.lock() = roots;
    }
}

/// The threads stopped for one collection.
#[derive(Debug)]
pub struct GcRound<'a> {
    /// Thread running the collection
    pub coordinator: ThreadId,
    /// Threads that stopped at a safepoint
    pub interrupted: Vec<ThreadId>,
    /// Blocked threads collected for
    pub stolen: Vec<ThreadId>,
    threads: &'a [Arc<ThreadSlot>],
}

impl GcRound<'_> {
    /// Every root published by every thread.
    pub fn roots(&self) -> Vec<ObjRef> {
        self.threads
            .iter()
            .flat_map(|slot| slot.roots.lock().clone())
            .collect()
    }

    /// Number of threads stopped, coordinator included.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[derive(Debug, Default)]
struct RoundState {
    completed: u64,
}

/// Coordinates stop-the-world collections among the threads of one
/// instance.
#[derive(Debug, Default)]
pub struct Orchestrator {
    threads: RwLock<Vec<Arc<ThreadSlot>>>,
    next_id: AtomicUsize,
    in_progress: AtomicBool,
    votes: AtomicUsize,
    state: Mutex<RoundState>,
    cond: Condvar,
}

impl Orchestrator {
    /// Creates an orchestrator with no threads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new mutator thread. Waits out a round in progress.
    pub fn register(&self) -> Arc<ThreadSlot> {
        let id = ThreadId(self.next_id.fetch_add(1, Ordering::AcqRel) as u16);
        let slot = Arc::new(ThreadSlot::new(id));
        self.threads.write().push(slot.clone());
        log::debug!("registered thread {}", id.0);
        slot
    }

    /// Removes a thread. It stays blocked until removed so a concurrent
    /// round does not wait for it.
    pub fn unregister(&self, me: &Arc<ThreadSlot>) {
        let _blocked = self.block(me, Vec::new());
        self.threads.write().retain(|slot| !Arc::ptr_eq(slot, me));
        log::debug!("unregistered thread {}", me.id.0);
    }

    /// Number of registered threads.
    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// True while a round is running.
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Number of completed rounds.
    pub fn rounds_completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Checks for a pending interrupt. If there is one, publishes roots,
    /// votes, and waits for the round to finish.
    ///
    /// Returns true if the thread took part in a round.
    pub fn safepoint(&self, me: &ThreadSlot, roots: &mut dyn FnMut() -> Vec<ObjRef>) -> bool {
        if me.status() != GcStatus::Interrupt {
            return false;
        }
        me.publish_roots(roots());
        self.vote_and_wait();
        true
    }

    fn vote_and_wait(&self) {
        let mut state = self.state.lock();
        let round = state.completed;
        self.votes.fetch_add(1, Ordering::AcqRel);
        self.cond.notify_all();
        while state.completed == round {
            self.cond.wait(&mut state);
        }
    }

    /// Runs a collection with every other thread stopped.
    ///
    /// If another thread is already coordinating, this thread joins that
    /// round as a participant instead and `collect` is not called; the
    /// return value is false in that case.
    pub fn run_round(
        &self,
        me: &ThreadSlot,
        roots: &mut dyn FnMut() -> Vec<ObjRef>,
        collect: &mut dyn FnMut(&GcRound<'_>),
    ) -> bool {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let backoff = Backoff::new();
            while self.in_progress() {
                if self.safepoint(me, roots) {
                    return false;
                }
                backoff.snooze();
            }
            return false;
        }

        let threads = self.threads.read();
        me.publish_roots(roots());
        let mut interrupted = Vec::new();
        let mut stolen = Vec::new();
        for slot in threads.iter().filter(|slot| slot.id != me.id) {
            let backoff = Backoff::new();
            loop {
                if slot.transition(GcStatus::None, GcStatus::Interrupt).is_ok() {
                    interrupted.push(slot.id);
                    break;
                }
                if slot.transition(GcStatus::Unable, GcStatus::Stolen).is_ok() {
                    stolen.push(slot.id);
                    break;
                }
                backoff.spin();
            }
        }

        {
            let mut state = self.state.lock();
            while self.votes.load(Ordering::Acquire) < interrupted.len() {
                self.cond.wait(&mut state);
            }
        }
        log::debug!(
            "thread {} coordinating collection: {} interrupted, {} stolen",
            me.id.0,
            interrupted.len(),
            stolen.len()
        );

        let round = GcRound {
            coordinator: me.id,
            interrupted,
            stolen,
            threads: &threads,
        };
        collect(&round);

        for slot in threads.iter() {
            if round.interrupted.contains(&slot.id) {
                let _ = slot.transition(GcStatus::Interrupt, GcStatus::None);
            } else if round.stolen.contains(&slot.id) {
                let _ = slot.transition(GcStatus::Stolen, GcStatus::Unable);
            }
        }
        self.votes.store(0, Ordering::Release);
        self.in_progress.store(false, Ordering::Release);
        let mut state = self.state.lock();
        state.completed += 1;
        self.cond.notify_all();
        true
    }

    /// Marks the thread blocked until the guard is dropped. A round that
    /// starts meanwhile collects on its behalf using `roots`.
    pub fn block<'a>(&'a self, me: &'a ThreadSlot, roots: Vec<ObjRef>) -> BlockedGuard<'a> {
        self.park(me, roots);
        BlockedGuard {
            orchestrator: self,
            slot: me,
        }
    }

    /// Marks the thread blocked until [`Orchestrator::unpark`]. Used by
    /// threads that sit idle between runs and cannot hold a guard.
    pub fn park(&self, me: &ThreadSlot, roots: Vec<ObjRef>) {
        me.publish_roots(roots);
        let backoff = Backoff::new();
        loop {
            match me.transition(GcStatus::None, GcStatus::Unable) {
                Ok(()) => return,
                Err(GcStatus::Unable) => return,
                Err(GcStatus::Interrupt) => self.vote_and_wait(),
                Err(_) => backoff.snooze(),
            }
        }
    }

    /// Resumes a parked thread, waiting first if a round is collecting on
    /// its behalf.
    pub fn unpark(&self, me: &ThreadSlot) {
        loop {
            match me.transition(GcStatus::Unable, GcStatus::None) {
                Ok(()) => return,
                Err(GcStatus::Stolen) => {
                    let mut state = self.state.lock();
                    while me.status() == GcStatus::Stolen {
                        self.cond.wait(&mut state);
                    }
                }
                Err(_) => return,
            }
        }
    }
}

/// A thread blocked outside VM code. Dropping it resumes the thread,
/// waiting first if a round is collecting on its behalf.
#[derive(Debug)]
pub struct BlockedGuard<'a> {
    orchestrator: &'a Orchestrator,
    slot: &'a ThreadSlot,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.unpark(self.slot);
    }
}
