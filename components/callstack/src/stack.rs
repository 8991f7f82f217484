//! Region-based call stack.
//!
//! The stack is an ordered chain of regions. Each region is a bump arena of
//! [`REGION_SIZE`] accounted bytes whose first record is a start-of-region
//! sentinel. `current` moves forward when a region fills up and back when
//! one empties; regions past `current` are kept for reuse.

use crate::record::{FrameEnv, FrameState, Record, RecordKind};
use bytecode_system::Reg;
use core_types::{vm_panic, ObjRef, Value, PANIC_STACK};
use std::sync::Arc;

/// Accounted capacity of a standard region.
pub const REGION_SIZE: usize = 131_072;

/// A bump-allocated arena of records.
#[derive(Debug, Clone)]
pub struct Region {
    pub(crate) records: Vec<Record>,
    used: usize,
    capacity: usize,
}

impl Region {
    fn new(capacity: usize) -> Self {
        let mut region = Region {
            records: Vec::new(),
            used: 0,
            capacity,
        };
        region.reset();
        region
    }

    /// Empties the region, leaving only its sentinel.
    fn reset(&mut self) {
        self.records.clear();
        self.records.push(Record::StartOfRegion);
        self.used = Record::StartOfRegion.size();
    }

    fn fits(&self, size: usize) -> bool {
        self.used + size <= self.capacity
    }

    fn push(&mut self, record: Record) -> u32 {
        self.used += record.size();
        self.records.push(record);
        (self.records.len() - 1) as u32
    }

    /// True if only the sentinel is left.
    fn is_vacant(&self) -> bool {
        self.records.len() <= 1
    }

    /// Accounted bytes in use.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Accounted capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records in allocation order, sentinel first.
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Address of a record: region position in the chain plus record index.
///
/// Valid until the record is popped or its region is sliced off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordRef {
    /// Position of the region in the chain
    pub region: u32,
    /// Index of the record within the region
    pub index: u32,
}

/// A thread's call stack.
#[derive(Debug)]
pub struct CallStack {
    pub(crate) regions: Vec<Region>,
    pub(crate) current: usize,
}

impl CallStack {
    /// Creates a stack with one empty region.
    pub fn new() -> Self {
        CallStack {
            regions: vec![Region::new(REGION_SIZE)],
            current: 0,
        }
    }

    /// Moves to the next region, reusing a cached one when it is big enough.
    fn next_region(&mut self, size: usize) {
        let needed = size + Record::StartOfRegion.size();
        let capacity = needed.max(REGION_SIZE);
        self.current += 1;
        if self.current == self.regions.len() {
            self.regions.push(Region::new(capacity));
        } else if self.regions[self.current].capacity < needed {
            self.regions.insert(self.current, Region::new(capacity));
        } else {
            self.regions[self.current].reset();
        }
        log::trace!("call stack moved to region {}", self.current);
    }

    fn push(&mut self, record: Record) -> RecordRef {
        let size = record.size();
        if !self.regions[self.current].fits(size) {
            self.next_region(size);
        }
        let index = self.regions[self.current].push(record);
        RecordRef {
            region: self.current as u32,
            index,
        }
    }

    /// Pushes a frame whose environment lives on the stack.
    pub fn push_frame(&mut self, state: FrameState, env: FrameEnv) -> RecordRef {
        self.push(Record::Frame { state, env })
    }

    /// Pushes a frame whose environment is already a heap frame.
    pub fn push_heap_frame(&mut self, state: FrameState, frame: ObjRef) -> RecordRef {
        self.push(Record::HeapFrame { state, frame })
    }

    /// Starts a fresh region holding a continuation boundary.
    pub fn push_continuation_tag(&mut self, tag: Value, result_reg: Reg) -> RecordRef {
        let record = Record::ContinuationTag { tag, result_reg };
        self.next_region(record.size());
        self.push(record)
    }

    /// Marks that a resolver is recording.
    pub fn push_dispatch_record(&mut self, dispatcher: Arc<str>) -> RecordRef {
        self.push(Record::DispatchRecord { dispatcher })
    }

    /// Holds the temporaries of a running dispatch program.
    pub fn push_dispatch_run(&mut self, temps: Vec<Value>) -> RecordRef {
        self.push(Record::DispatchRun { temps })
    }

    /// Pops the top record, crossing back into the previous region when the
    /// current one empties.
    pub fn pop(&mut self) -> Option<Record> {
        if self.regions[self.current].is_vacant() {
            return None;
        }
        let record = self.regions[self.current].records.pop();
        if let Some(r) = &record {
            let region = &mut self.regions[self.current];
            region.used -= r.size();
        }
        if self.current > 0 && self.regions[self.current].is_vacant() {
            self.regions[self.current].reset();
            self.current -= 1;
        }
        record
    }

    /// The top record, skipping sentinels.
    pub fn top(&self) -> Option<&Record> {
        self.walk().next().map(|(_, r)| r)
    }

    /// Looks up a record.
    pub fn get(&self, at: RecordRef) -> Option<&Record> {
        if at.region as usize > self.current {
            return None;
        }
        self.regions.get(at.region as usize)?.records.get(at.index as usize)
    }

    /// Looks up a record mutably.
    pub fn get_mut(&mut self, at: RecordRef) -> Option<&mut Record> {
        if at.region as usize > self.current {
            return None;
        }
        self.regions
            .get_mut(at.region as usize)?
            .records
            .get_mut(at.index as usize)
    }

    /// Walks records from newest to oldest.
    ///
    /// Sentinels are not yielded; meeting one moves the walk to the top of
    /// the previous region.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: self,
            region: self.current,
            index: self.regions[self.current].records.len(),
        }
    }

    /// The topmost frame record.
    pub fn current_frame(&self) -> Option<RecordRef> {
        self.walk().find(|(_, r)| r.is_frame()).map(|(at, _)| at)
    }

    /// Execution state of a frame record.
    pub fn frame_state(&self, at: RecordRef) -> Option<&FrameState> {
        self.get(at)?.frame_state()
    }

    /// Mutable execution state of a frame record.
    pub fn frame_state_mut(&mut self, at: RecordRef) -> Option<&mut FrameState> {
        self.get_mut(at)?.frame_state_mut()
    }

    /// Number of frame records.
    pub fn depth(&self) -> usize {
        self.walk().filter(|(_, r)| r.is_frame()).count()
    }

    /// True when no records besides sentinels are live.
    pub fn is_empty(&self) -> bool {
        self.walk().next().is_none()
    }

    /// Regions allocated so far, live or cached.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Position of the current region.
    pub fn current_region(&self) -> usize {
        self.current
    }

    /// Moves a frame's environment to the heap.
    ///
    /// `alloc` receives the environment and returns the heap frame holding
    /// it. Promoting a frame that already lives on the heap returns its
    /// existing heap frame without calling `alloc`.
    pub fn promote_to_heap(&mut self, at: RecordRef, alloc: &mut dyn FnMut(FrameEnv) -> ObjRef) -> ObjRef {
        let record = match self.get_mut(at) {
            Some(r) => r,
            None => vm_panic(PANIC_STACK, "frame promotion of a record that is not on the stack"),
        };
        match std::mem::replace(record, Record::StartOfRegion) {
            Record::Frame { state, env } => {
                let frame = alloc(env);
                log::trace!("promoted frame of {:?} to {}", state.static_frame, frame);
                *record = Record::PromotedFrame { state, frame };
                frame
            }
            Record::PromotedFrame { state, frame } => {
                *record = Record::PromotedFrame { state, frame };
                frame
            }
            Record::HeapFrame { state, frame } => {
                *record = Record::HeapFrame { state, frame };
                frame
            }
            other => {
                let kind = other.kind();
                *record = other;
                vm_panic(PANIC_STACK, &format!("frame promotion of a {:?} record", kind))
            }
        }
    }

    /// Promotes every frame on the stack.
    pub fn promote_all(&mut self, alloc: &mut dyn FnMut(FrameEnv) -> ObjRef) {
        for region in 0..=self.current {
            for index in 0..self.regions[region].records.len() {
                let at = RecordRef {
                    region: region as u32,
                    index: index as u32,
                };
                if self.regions[region].records[index].kind() == RecordKind::Frame {
                    self.promote_to_heap(at, alloc);
                }
            }
        }
    }

    /// Visits every value held by a live record.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        for region in &self.regions[..=self.current] {
            for record in &region.records {
                record.visit_values(f);
            }
        }
    }

    /// Drops every record, keeping the regions for reuse.
    pub fn clear(&mut self) {
        for region in &mut self.regions {
            region.reset();
        }
        self.current = 0;
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over live records, newest first.
pub struct Walk<'a> {
    stack: &'a CallStack,
    region: usize,
    index: usize,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (RecordRef, &'a Record);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.index == 0 {
                return None;
            }
            self.index -= 1;
            let record = &self.stack.regions[self.region].records[self.index];
            if let Record::StartOfRegion = record {
                if self.region == 0 {
                    return None;
                }
                self.region -= 1;
                self.index = self.stack.regions[self.region].records.len();
                continue;
            }
            let at = RecordRef {
                region: self.region as u32,
                index: self.index as u32,
            };
            return Some((at, record));
        }
    }
}
