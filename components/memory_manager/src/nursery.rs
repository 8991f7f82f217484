//! Per-thread nursery: a semispace copying young generation.
//!
//! Objects are allocated by appending to the current semispace. A minor
//! collection flips the spaces: the current space becomes the from-space
//! the collector evacuates out of, and survivors are appended to the fresh
//! (previously spare) space. Evacuated slots are left behind as forwarding
//! tombstones until the collection finishes.
//!
//! Object storage itself sits in the heap's handle table; a nursery slot
//! records which handle occupies it, which is what residency and
//! evacuation work on.

use crate::header::Location;
use core_types::{ObjRef, ThreadId};

/// A nursery slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NurserySlot {
    /// Object in place
    Live(ObjRef),
    /// Object evacuated to the recorded location
    Forwarded(Location),
}

/// Young generation of one thread.
#[derive(Debug)]
pub struct Nursery {
    thread: ThreadId,
    space: Vec<NurserySlot>,
    spare: Vec<NurserySlot>,
    used: usize,
    limit: usize,
}

impl Nursery {
    /// Creates a nursery for `thread`.
    ///
    /// # Arguments
    ///
    /// * `thread` - Owning mutator thread
    /// * `limit` - Bytes that may be allocated before a collection is wanted
    pub fn new(thread: ThreadId, limit: usize) -> Self {
        Nursery {
            thread,
            space: Vec::new(),
            spare: Vec::new(),
            used: 0,
            limit,
        }
    }

    /// Owning thread.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Records `obj` of `size` accounted bytes in the current space and
    /// returns its slot index.
    ///
    /// Allocation never fails; going past the limit only makes
    /// [`Nursery::over_limit`] true.
    pub fn allocate(&mut self, obj: ObjRef, size: usize) -> u32 {
        self.used += size;
        let index = self.space.len() as u32;
        self.space.push(NurserySlot::Live(obj));
        index
    }

    /// True once allocation has passed the soft limit.
    pub fn over_limit(&self) -> bool {
        self.used >= self.limit
    }

    /// Bytes allocated into the current space.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Soft limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of objects in the current space.
    pub fn len(&self) -> usize {
        self.space.len()
    }

    /// True if the current space is empty.
    pub fn is_empty(&self) -> bool {
        self.space.is_empty()
    }

    /// Handle at `index` of the current space.
    pub fn get(&self, index: u32) -> Option<ObjRef> {
        match self.space.get(index as usize) {
            Some(NurserySlot::Live(obj)) => Some(*obj),
            _ => None,
        }
    }

    /// Live handles of the current space with their slot indices.
    pub fn residents(&self) -> impl Iterator<Item = (u32, ObjRef)> + '_ {
        self.space.iter().enumerate().filter_map(|(i, slot)| match slot {
            NurserySlot::Live(obj) => Some((i as u32, *obj)),
            NurserySlot::Forwarded(_) => None,
        })
    }

    /// Flips the semispaces and returns the from-space.
    ///
    /// The current space starts empty; survivors are allocated into it.
    pub fn flip(&mut self) -> Vec<NurserySlot> {
        self.used = 0;
        let fresh = std::mem::take(&mut self.spare);
        std::mem::replace(&mut self.space, fresh)
    }

    /// Hands the drained from-space back for reuse by the next flip.
    pub fn recycle(&mut self, mut from: Vec<NurserySlot>) {
        from.clear();
        self.spare = from;
    }
}
