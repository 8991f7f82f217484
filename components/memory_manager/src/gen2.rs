//! Second generation: size-classed pages with per-class free lists.
//!
//! Objects promoted out of a nursery land in the size class matching their
//! accounted size (8-byte granularity). Each class grows in pages of a fixed
//! number of slots; freed slots go on the class's free list and are reused
//! first. Objects larger than the largest class go on the overflow list.
//!
//! A slot records the handle that occupies it and the accounted size; the
//! object itself stays in the heap's handle table.

use crate::header::{Gen2Slot, OVERFLOW_BIN};
use core_types::ObjRef;

/// Bits of size granularity.
pub const GEN2_BIN_BITS: usize = 3;
/// Number of size classes.
pub const GEN2_BINS: usize = 40;
/// Slots per page.
pub const GEN2_PAGE_ITEMS: usize = 256;
/// Largest size served by a size class.
pub const GEN2_MAX_SIZE: usize = GEN2_BINS << GEN2_BIN_BITS;

/// Occupant of a gen2 slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    handle: ObjRef,
    size: u32,
}

#[derive(Debug, Default)]
struct SizeClass {
    pages: Vec<Vec<Option<Entry>>>,
    free_list: Vec<u32>,
}

impl SizeClass {
    fn allocate(&mut self, obj: Entry) -> u32 {
        if let Some(index) = self.free_list.pop() {
            let (page, item) = split(index);
            self.pages[page][item] = Some(obj);
            return index;
        }
        let needs_page = self
            .pages
            .last()
            .map_or(true, |p| p.len() == GEN2_PAGE_ITEMS);
        if needs_page {
            self.pages.push(Vec::with_capacity(GEN2_PAGE_ITEMS));
        }
        let page = self.pages.len() - 1;
        let item = self.pages[page].len();
        self.pages[page].push(Some(obj));
        (page * GEN2_PAGE_ITEMS + item) as u32
    }

    fn slot(&self, index: u32) -> Option<&Option<Entry>> {
        let (page, item) = split(index);
        self.pages.get(page).and_then(|p| p.get(item))
    }

    fn slot_mut(&mut self, index: u32) -> Option<&mut Option<Entry>> {
        let (page, item) = split(index);
        self.pages.get_mut(page).and_then(|p| p.get_mut(item))
    }
}

fn split(index: u32) -> (usize, usize) {
    let index = index as usize;
    (index / GEN2_PAGE_ITEMS, index % GEN2_PAGE_ITEMS)
}

/// The second generation.
#[derive(Debug)]
pub struct Gen2 {
    bins: Vec<SizeClass>,
    overflows: Vec<Option<Entry>>,
    overflow_free: Vec<u32>,
    live_bytes: usize,
    live_objects: usize,
}

impl Default for Gen2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Gen2 {
    /// Creates an empty second generation.
    pub fn new() -> Self {
        Gen2 {
            bins: (0..GEN2_BINS).map(|_| SizeClass::default()).collect(),
            overflows: Vec::new(),
            overflow_free: Vec::new(),
            live_bytes: 0,
            live_objects: 0,
        }
    }

    /// Size class for an accounted size, `None` for overflow objects.
    pub fn bin_for(size: usize) -> Option<usize> {
        if size == 0 || size > GEN2_MAX_SIZE {
            None
        } else {
            Some((size - 1) >> GEN2_BIN_BITS)
        }
    }

    /// Places `handle` of `size` accounted bytes and returns its slot.
    pub fn allocate(&mut self, handle: ObjRef, size: usize) -> Gen2Slot {
        let obj = Entry {
            handle,
            size: size as u32,
        };
        self.live_bytes += size;
        self.live_objects += 1;
        match Self::bin_for(size) {
            Some(bin) => Gen2Slot {
                bin: bin as u16,
                index: self.bins[bin].allocate(obj),
            },
            None => {
                let index = match self.overflow_free.pop() {
                    Some(index) => {
                        self.overflows[index as usize] = Some(obj);
                        index
                    }
                    None => {
                        self.overflows.push(Some(obj));
                        (self.overflows.len() - 1) as u32
                    }
                };
                Gen2Slot {
                    bin: OVERFLOW_BIN,
                    index,
                }
            }
        }
    }

    fn slot(&self, at: Gen2Slot) -> Option<&Option<Entry>> {
        if at.bin == OVERFLOW_BIN {
            self.overflows.get(at.index as usize)
        } else {
            self.bins.get(at.bin as usize).and_then(|b| b.slot(at.index))
        }
    }

    fn slot_mut(&mut self, at: Gen2Slot) -> Option<&mut Option<Entry>> {
        if at.bin == OVERFLOW_BIN {
            self.overflows.get_mut(at.index as usize)
        } else {
            self.bins
                .get_mut(at.bin as usize)
                .and_then(|b| b.slot_mut(at.index))
        }
    }

    /// Handle occupying `at`.
    pub fn get(&self, at: Gen2Slot) -> Option<ObjRef> {
        self.slot(at).and_then(|s| s.as_ref()).map(|e| e.handle)
    }

    /// Empties `at`, putting the slot on the free list, and returns the
    /// handle that occupied it.
    pub fn free(&mut self, at: Gen2Slot) -> Option<ObjRef> {
        let obj = self.slot_mut(at)?.take()?;
        if at.bin == OVERFLOW_BIN {
            self.overflow_free.push(at.index);
        } else {
            self.bins[at.bin as usize].free_list.push(at.index);
        }
        self.live_bytes -= obj.size as usize;
        self.live_objects -= 1;
        Some(obj.handle)
    }

    /// Slots of every live object.
    pub fn live_slots(&self) -> Vec<Gen2Slot> {
        let mut slots = Vec::with_capacity(self.live_objects);
        for (bin, class) in self.bins.iter().enumerate() {
            for (p, page) in class.pages.iter().enumerate() {
                for (i, obj) in page.iter().enumerate() {
                    if obj.is_some() {
                        slots.push(Gen2Slot {
                            bin: bin as u16,
                            index: (p * GEN2_PAGE_ITEMS + i) as u32,
                        });
                    }
                }
            }
        }
        for (i, obj) in self.overflows.iter().enumerate() {
            if obj.is_some() {
                slots.push(Gen2Slot {
                    bin: OVERFLOW_BIN,
                    index: i as u32,
                });
            }
        }
        slots
    }

    /// Bytes held by live objects.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    /// Length of a size class's free list.
    pub fn free_list_len(&self, bin: usize) -> usize {
        self.bins.get(bin).map_or(0, |b| b.free_list.len())
    }

    /// Pages allocated for a size class.
    pub fn page_count(&self, bin: usize) -> usize {
        self.bins.get(bin).map_or(0, |b| b.pages.len())
    }
}
