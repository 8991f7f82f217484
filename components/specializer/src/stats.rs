//! Specialization statistics
//!
//! The worker folds log batches into per-routine statistics: hits per
//! callsite shape and per argument type tuple, and for each type tuple
//! what was seen at individual instruction offsets. Observations at one
//! offset are bounded; a new observation replaces the least-counted one.

use crate::spesh_log::{LogEntry, ObservedType, TypeTuple};
use bytecode_system::CallsiteId;
use core_types::{StaticFrameId, ThreadId};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Frames remembered per thread for resolving correlation ids.
const OPEN_FRAMES_PER_THREAD: usize = 1024;
/// Type tuples kept per callsite shape.
const MAX_TUPLES: usize = 16;

/// Increments `key`'s count in a bounded list.
fn bump<K: PartialEq>(list: &mut Vec<(K, u32)>, key: K, cap: usize) {
    if let Some(entry) = list.iter_mut().find(|(k, _)| *k == key) {
        entry.1 = entry.1.saturating_add(1);
        return;
    }
    if list.len() < cap {
        list.push((key, 1));
        return;
    }
    if let Some(least) = list.iter_mut().min_by_key(|(_, count)| *count) {
        *least = (key, 1);
    }
}

/// Observations at one instruction offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OffsetStats {
    /// Object types produced, with counts
    pub types: Vec<(ObservedType, u32)>,
    /// Routines invoked, with counts
    pub invokes: Vec<(StaticFrameId, u32)>,
    /// Dispatch programs that ran, with counts
    pub dispatches: Vec<(u64, u32)>,
}

impl OffsetStats {
    /// The dispatch program, if only one was ever seen here.
    pub fn single_dispatch(&self) -> Option<u64> {
        match self.dispatches.as_slice() {
            [(program, _)] => Some(*program),
            _ => None,
        }
    }
}

/// Stats for one argument type tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleStats {
    /// The tuple
    pub types: TypeTuple,
    /// Calls seen with it
    pub hits: u64,
    /// Deepest call stack it was entered at
    pub max_depth: u32,
    /// Per-offset observations
    pub offsets: BTreeMap<u32, OffsetStats>,
}

/// Stats for one callsite shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CallsiteStats {
    /// The shape
    pub callsite: CallsiteId,
    /// Calls seen with it
    pub hits: u64,
    /// Per type tuple
    pub tuples: Vec<TupleStats>,
}

/// Stats for one routine.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineStats {
    /// Calls seen
    pub hits: u64,
    /// Stats version of the last update
    pub last_update: u64,
    /// Per callsite shape
    pub by_callsite: Vec<CallsiteStats>,
}

/// Identifies the stats a frame's entries belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// Routine
    pub routine: StaticFrameId,
    /// Shape
    pub callsite: CallsiteId,
    /// Argument types
    pub types: TypeTuple,
}

/// Stats of every routine seen recently.
#[derive(Debug)]
pub struct SpeshStats {
    routines: HashMap<StaticFrameId, RoutineStats>,
    open_frames: HashMap<ThreadId, VecDeque<(u32, FrameKey)>>,
    version: u64,
    max_age: u64,
    max_offset_entries: usize,
}

impl SpeshStats {
    /// Creates empty stats.
    pub fn new(max_age: u64, max_offset_entries: usize) -> Self {
        SpeshStats {
            routines: HashMap::new(),
            open_frames: HashMap::new(),
            version: 0,
            max_age,
            max_offset_entries: max_offset_entries.max(1),
        }
    }

    /// Batches processed so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stats of one routine.
    pub fn routine(&self, id: StaticFrameId) -> Option<&RoutineStats> {
        self.routines.get(&id)
    }

    /// Every routine with stats.
    pub fn routines(&self) -> impl Iterator<Item = (&StaticFrameId, &RoutineStats)> {
        self.routines.iter()
    }

    /// Stats of one frame key.
    pub fn tuple(&self, key: &FrameKey) -> Option<&TupleStats> {
        self.routines
            .get(&key.routine)?
            .by_callsite
            .iter()
            .find(|cs| cs.callsite == key.callsite)?
            .tuples
            .iter()
            .find(|t| t.types == key.types)
    }

    /// Folds a batch into the stats, then ages them.
    pub fn update(&mut self, thread: ThreadId, entries: &[LogEntry]) {
        for entry in entries {
            match entry {
                LogEntry::Entry {
                    correlation,
                    routine,
                    callsite,
                    types,
                    depth,
                } => {
                    let key = FrameKey {
                        routine: *routine,
                        callsite: *callsite,
                        types: types.clone(),
                    };
                    self.enter(&key, *depth);
                    let frames = self.open_frames.entry(thread).or_default();
                    if frames.len() >= OPEN_FRAMES_PER_THREAD {
                        frames.pop_front();
                    }
                    frames.push_back((*correlation, key));
                }
                LogEntry::Type { correlation, offset, ty } => {
                    let cap = self.max_offset_entries;
                    if let Some(at) = self.offset_mut(thread, *correlation, *offset) {
                        bump(&mut at.types, *ty, cap);
                    }
                }
                LogEntry::Invoke {
                    correlation,
                    offset,
                    target,
                } => {
                    let cap = self.max_offset_entries;
                    if let Some(at) = self.offset_mut(thread, *correlation, *offset) {
                        bump(&mut at.invokes, *target, cap);
                    }
                }
                LogEntry::Dispatch {
                    correlation,
                    offset,
                    program,
                } => {
                    let cap = self.max_offset_entries;
                    if let Some(at) = self.offset_mut(thread, *correlation, *offset) {
                        bump(&mut at.dispatches, *program, cap);
                    }
                }
            }
        }
        self.version += 1;
        self.age();
    }

    fn enter(&mut self, key: &FrameKey, depth: u32) {
        let version = self.version;
        let routine = self.routines.entry(key.routine).or_insert_with(|| RoutineStats {
            hits: 0,
            last_update: version,
            by_callsite: Vec::new(),
        });
        routine.hits += 1;
        routine.last_update = version;

        let pos = match routine.by_callsite.iter().position(|cs| cs.callsite == key.callsite) {
            Some(pos) => pos,
            None => {
                routine.by_callsite.push(CallsiteStats {
                    callsite: key.callsite,
                    hits: 0,
                    tuples: Vec::new(),
                });
                routine.by_callsite.len() - 1
            }
        };
        let cs = &mut routine.by_callsite[pos];
        cs.hits += 1;

        if let Some(tuple) = cs.tuples.iter_mut().find(|t| t.types == key.types) {
            tuple.hits += 1;
            tuple.max_depth = tuple.max_depth.max(depth);
            return;
        }
        let fresh = TupleStats {
            types: key.types.clone(),
            hits: 1,
            max_depth: depth,
            offsets: BTreeMap::new(),
        };
        if cs.tuples.len() < MAX_TUPLES {
            cs.tuples.push(fresh);
        } else if let Some(least) = cs.tuples.iter_mut().min_by_key(|t| t.hits) {
            *least = fresh;
        }
    }

    fn offset_mut(&mut self, thread: ThreadId, correlation: u32, offset: u32) -> Option<&mut OffsetStats> {
        let key = self
            .open_frames
            .get(&thread)?
            .iter()
            .rev()
            .find(|(c, _)| *c == correlation)
            .map(|(_, key)| key.clone())?;
        let tuple = self
            .routines
            .get_mut(&key.routine)?
            .by_callsite
            .iter_mut()
            .find(|cs| cs.callsite == key.callsite)?
            .tuples
            .iter_mut()
            .find(|t| t.types == key.types)?;
        Some(tuple.offsets.entry(offset).or_default())
    }

    fn age(&mut self) {
        let version = self.version;
        let max_age = self.max_age;
        let before = self.routines.len();
        self.routines
            .retain(|_, stats| version.saturating_sub(stats.last_update) <= max_age);
        let dropped = before - self.routines.len();
        if dropped > 0 {
            log::debug!("dropped stale spesh stats of {} routine(s)", dropped);
        }
    }
}
