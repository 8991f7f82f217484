//! Collectable header and object locations.

use core_types::{ObjRef, ThreadId};

/// Accounted size of a collectable header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Bin number used for gen2 objects too large for any size class.
pub const OVERFLOW_BIN: u16 = u16::MAX;

/// Position of a gen2 object: size class plus slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gen2Slot {
    /// Size class, or [`OVERFLOW_BIN`]
    pub bin: u16,
    /// Slot index within the size class (page * items per page + item)
    pub index: u32,
}

/// Where the object behind a handle currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Handle is not in use
    Free,
    /// In a thread's nursery
    Nursery {
        /// Owning thread of the nursery
        thread: ThreadId,
        /// Slot in the nursery's current semispace
        index: u32,
    },
    /// In the second generation
    Gen2(Gen2Slot),
}

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    /// Object lives in the second generation
    pub const SECOND_GEN: HeaderFlags = HeaderFlags(1);
    /// Object is a type object
    pub const TYPE_OBJECT: HeaderFlags = HeaderFlags(2);
    /// Object is in a remembered set
    pub const IN_REMEMBERED_SET: HeaderFlags = HeaderFlags(4);
    /// Object was reached by the current full collection
    pub const MARKED: HeaderFlags = HeaderFlags(8);

    /// True if every bit of `other` is set.
    pub fn contains(self, other: HeaderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: HeaderFlags) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: HeaderFlags) {
        self.0 &= !other.0;
    }
}

/// Metadata every heap object carries.
#[derive(Debug, Clone)]
pub struct CollectableHeader {
    /// Generation and GC state bits
    pub flags: HeaderFlags,
    /// Thread that allocated the object
    pub owner: ThreadId,
    /// Number of nursery collections survived
    pub age: u8,
    /// Owning serialization context; weak, never used for ownership
    pub sc: Option<u32>,
    /// The object's own handle
    pub handle: ObjRef,
    /// Accounted size in bytes, header included
    pub size: u32,
}

impl CollectableHeader {
    /// Creates a header for a fresh nursery object.
    pub fn new(handle: ObjRef, owner: ThreadId, size: usize) -> Self {
        CollectableHeader {
            flags: HeaderFlags::default(),
            owner,
            age: 0,
            sc: None,
            handle,
            size: size as u32,
        }
    }

    /// True if the object is in the second generation.
    pub fn is_gen2(&self) -> bool {
        self.flags.contains(HeaderFlags::SECOND_GEN)
    }

    /// True if the object is a type object.
    pub fn is_type_object(&self) -> bool {
        self.flags.contains(HeaderFlags::TYPE_OBJECT)
    }
}

/// Rounds an accounted size up to 8-byte alignment.
pub fn align_size(size: usize) -> usize {
    (size + 7) & !7
}
