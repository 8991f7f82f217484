//! Append-only table with stable element addresses.
//!
//! Storage is split into segments of doubling length. A segment is created
//! the first time an index inside it is requested and never moves or shrinks
//! afterwards, so shared references into the table stay valid while other
//! threads grow it. Lookups are index arithmetic; there is no table lock.

use std::sync::OnceLock;

/// Length of the first segment, as a power of two.
const FIRST_SEGMENT_BITS: u32 = 6;
/// Segment count; enough to address every `u32` index.
const SEGMENTS: usize = 27;

/// Segment number and offset within it for `index`.
fn split(index: usize) -> (usize, usize) {
    let scaled = (index >> FIRST_SEGMENT_BITS) + 1;
    let segment = (usize::BITS - 1 - scaled.leading_zeros()) as usize;
    let start = ((1usize << segment) - 1) << FIRST_SEGMENT_BITS;
    (segment, index - start)
}

fn segment_len(segment: usize) -> usize {
    1usize << (FIRST_SEGMENT_BITS as usize + segment)
}

/// A growable table whose elements never move.
#[derive(Debug)]
pub struct SegmentedTable<T> {
    segments: [OnceLock<Box<[T]>>; SEGMENTS],
}

impl<T: Default> Default for SegmentedTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> SegmentedTable<T> {
    /// Creates an empty table. No segment is allocated yet.
    pub fn new() -> Self {
        SegmentedTable {
            segments: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Element at `index`, if its segment exists.
    pub fn get(&self, index: usize) -> Option<&T> {
        let (segment, offset) = split(index);
        self.segments.get(segment)?.get()?.get(offset)
    }

    /// Element at `index`, creating its segment on first use.
    ///
    /// `None` only for indices past the addressable range.
    pub fn get_or_create(&self, index: usize) -> Option<&T> {
        let (segment, offset) = split(index);
        let storage = self
            .segments
            .get(segment)?
            .get_or_init(|| (0..segment_len(segment)).map(|_| T::default()).collect());
        storage.get(offset)
    }

    /// Number of segments allocated so far.
    pub fn segments_allocated(&self) -> usize {
        self.segments.iter().filter(|s| s.get().is_some()).count()
    }
}
