//! Slicing the call stack into continuations and splicing it back.

use crate::record::{FrameState, Record, RecordKind};
use crate::stack::{CallStack, Region};
use bytecode_system::Reg;
use core_types::{ErrorKind, Value, VmError, VmResult};

/// A chain of regions cut off the call stack.
///
/// The first region starts with the continuation tag that bounded the
/// slice; frame contents were moved, not copied.
#[derive(Debug, Clone)]
pub struct DetachedStack {
    regions: Vec<Region>,
}

impl DetachedStack {
    /// The records of every region, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.regions.iter().flat_map(|r| r.records().iter())
    }

    /// Number of frame records in the chain.
    pub fn frame_count(&self) -> usize {
        self.records().filter(|r| r.is_frame()).count()
    }

    /// True if any frame in the chain keeps its environment on the heap.
    pub fn has_heap_frames(&self) -> bool {
        self.records().any(|r| {
            matches!(
                r.kind(),
                RecordKind::HeapFrame | RecordKind::PromotedFrame
            )
        })
    }

    /// The bottommost (oldest) frame.
    pub fn root_frame(&self) -> Option<&FrameState> {
        self.records().find_map(Record::frame_state)
    }

    /// The topmost (newest) frame.
    pub fn top_frame(&self) -> Option<&FrameState> {
        self.regions
            .iter()
            .rev()
            .flat_map(|r| r.records.iter().rev())
            .find_map(Record::frame_state)
    }

    /// Mutable bottommost frame.
    pub fn root_frame_mut(&mut self) -> Option<&mut FrameState> {
        self.regions
            .iter_mut()
            .flat_map(|r| r.records.iter_mut())
            .find_map(|r| r.frame_state_mut())
    }

    /// Mutable topmost frame.
    pub fn top_frame_mut(&mut self) -> Option<&mut FrameState> {
        self.regions
            .iter_mut()
            .rev()
            .flat_map(|r| r.records.iter_mut().rev())
            .find_map(|r| r.frame_state_mut())
    }

    /// Register in the resetting frame that the tag delivers into.
    pub fn tag_result_reg(&self) -> Option<Reg> {
        self.records().find_map(|r| match r {
            Record::ContinuationTag { result_reg, .. } => Some(*result_reg),
            _ => None,
        })
    }

    /// Visits every value held by the chain.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        for record in self.records() {
            record.visit_values(f);
        }
    }
}

impl CallStack {
    /// Finds the region whose boundary record carries `tag`, newest first.
    fn find_tag_region(&self, tag: &Value) -> Option<usize> {
        (1..=self.current).rev().find(|&i| {
            matches!(
                self.regions[i].records.get(1),
                Some(Record::ContinuationTag { tag: t, .. }) if t.is_identical(tag)
            )
        })
    }

    /// True if a reset with this tag is active.
    pub fn has_tag(&self, tag: &Value) -> bool {
        self.find_tag_region(tag).is_some()
    }

    /// Detaches every region from the newest boundary tagged `tag` up to the
    /// top of the stack.
    ///
    /// With `protect` the boundary stays in place on the stack so the reset
    /// can be captured again.
    pub fn slice(&mut self, tag: &Value, protect: bool) -> VmResult<DetachedStack> {
        let start = self.find_tag_region(tag).ok_or_else(|| {
            VmError::adhoc(ErrorKind::Continuation, "No matching continuation reset found")
        })?;
        let regions: Vec<Region> = self.regions.drain(start..=self.current).collect();
        self.current = start - 1;
        log::debug!(
            "sliced {} region(s) off the call stack at tag {:?}",
            regions.len(),
            tag
        );
        if protect {
            if let Some(Record::ContinuationTag { tag, result_reg }) = regions[0].records.get(1) {
                self.push_continuation_tag(tag.clone(), *result_reg);
            }
        }
        Ok(DetachedStack { regions })
    }

    /// Puts a detached chain back on top of this stack.
    pub fn splice(&mut self, detached: DetachedStack) {
        let count = detached.regions.len();
        let at = self.current + 1;
        self.regions.splice(at..at, detached.regions);
        self.current += count;
        log::debug!("spliced {} region(s) onto the call stack", count);
    }
}
