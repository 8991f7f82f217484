//! Callsite shapes and their intern table.
//!
//! A callsite describes how many positional arguments a call passes and of
//! which kind. Identical shapes are interned to the same [`CallsiteId`], so
//! specializations and guard trees can key on a plain integer.

use core_types::{Value, ValueKind};
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Kind of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgFlag {
    /// Object (or null)
    Obj,
    /// Native int
    Int,
    /// Native num
    Num,
    /// Native str
    Str,
}

impl ArgFlag {
    /// The flag a value would be passed with.
    pub fn of(value: &Value) -> ArgFlag {
        match value.kind() {
            ValueKind::Int => ArgFlag::Int,
            ValueKind::Num => ArgFlag::Num,
            ValueKind::Str => ArgFlag::Str,
            ValueKind::Null | ValueKind::Obj => ArgFlag::Obj,
        }
    }
}

/// Interned callsite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallsiteId(pub u32);

/// Shape of a call: one flag per positional argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Callsite {
    flags: Box<[ArgFlag]>,
}

impl Callsite {
    /// Creates a callsite shape.
    pub fn new(flags: &[ArgFlag]) -> Self {
        Callsite {
            flags: flags.into(),
        }
    }

    /// Argument flags in order.
    pub fn flags(&self) -> &[ArgFlag] {
        &self.flags
    }

    /// Number of positional arguments.
    pub fn num_pos(&self) -> usize {
        self.flags.len()
    }

    /// Number of object arguments.
    pub fn obj_arg_count(&self) -> usize {
        self.flags.iter().filter(|f| **f == ArgFlag::Obj).count()
    }

    /// True if `args` could have been passed through this shape.
    pub fn accepts(&self, args: &[Value]) -> bool {
        args.len() == self.flags.len()
            && args
                .iter()
                .zip(self.flags.iter())
                .all(|(v, f)| ArgFlag::of(v) == *f)
    }
}

struct InternTable {
    callsites: Vec<Arc<Callsite>>,
}

/// Intern table of callsite shapes.
///
/// Readers load the published table without locking. Writers serialize on a
/// mutex, build a new table containing the addition and publish it; the old
/// table is destroyed once no reader can still observe it.
pub struct CallsiteInterner {
    table: Atomic<InternTable>,
    write_lock: Mutex<()>,
}

impl CallsiteInterner {
    /// Creates an empty intern table.
    pub fn new() -> Self {
        CallsiteInterner {
            table: Atomic::new(InternTable {
                callsites: Vec::new(),
            }),
            write_lock: Mutex::new(()),
        }
    }

    fn find(&self, flags: &[ArgFlag]) -> Option<CallsiteId> {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: the table pointer is never null and is only destroyed after
        // every guard pinned before its replacement has been released.
        let table = unsafe { table.as_ref() }?;
        table
            .callsites
            .iter()
            .position(|cs| cs.flags() == flags)
            .map(|i| CallsiteId(i as u32))
    }

    /// Returns the id of the shape, interning it if needed.
    pub fn intern(&self, flags: &[ArgFlag]) -> CallsiteId {
        if let Some(id) = self.find(flags) {
            return id;
        }
        let _writer = self.write_lock.lock();
        if let Some(id) = self.find(flags) {
            return id;
        }
        let guard = epoch::pin();
        let current = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: see `find`; writers are serialized so `current` stays live.
        let mut callsites = unsafe { current.as_ref() }
            .map(|t| t.callsites.clone())
            .unwrap_or_default();
        let id = CallsiteId(callsites.len() as u32);
        callsites.push(Arc::new(Callsite::new(flags)));
        let old = self
            .table
            .swap(Owned::new(InternTable { callsites }), Ordering::AcqRel, &guard);
        // SAFETY: `old` is unreachable from the atomic now; readers still
        // holding it are pinned, so destruction waits for them.
        unsafe { guard.defer_destroy(old) };
        log::trace!("interned callsite {:?} as {:?}", flags, id);
        id
    }

    /// Looks up an interned shape.
    pub fn get(&self, id: CallsiteId) -> Option<Arc<Callsite>> {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: see `find`.
        let table = unsafe { table.as_ref() }?;
        table.callsites.get(id.0 as usize).cloned()
    }

    /// Number of interned shapes.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);
        // SAFETY: see `find`.
        unsafe { table.as_ref() }.map_or(0, |t| t.callsites.len())
    }

    /// True if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CallsiteInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallsiteInterner").field("len", &self.len()).finish()
    }
}

impl Default for CallsiteInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallsiteInterner {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the table.
        unsafe {
            let guard = epoch::unprotected();
            let table = self.table.load(Ordering::Relaxed, guard);
            if !table.is_null() {
                drop(table.into_owned());
            }
        }
    }
}
