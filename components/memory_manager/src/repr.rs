//! Representations (REPRs)
//!
//! A REPR decides how instances of a type are laid out and which low-level
//! operations they support. The required part is the [`Repr`] trait; the
//! optional parts are capability traits a REPR exposes through the
//! `*_capability` accessors. Which capabilities a REPR has is fixed by its
//! implementation and resolved once when it is registered.

use crate::object::{ArraySlotType, NativeKind, ObjectBody};
use crate::stable::STable;
use crate::worklist::Worklist;
use core_types::{ErrorKind, VmError, VmResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Index of a registered REPR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReprId(pub u16);

/// How values of a type can be stored inline in other objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSpec {
    /// Whether the value can be stored inline (natively) at all
    pub inlineable: bool,
    /// Bits used when stored inline
    pub bits: u16,
    /// Native kind it boxes, if it is a boxed primitive
    pub boxed_primitive: Option<BoxedPrimitive>,
}

/// Native kinds a REPR can box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxedPrimitive {
    /// Native integer
    Int,
    /// Native float
    Num,
    /// String
    Str,
}

impl StorageSpec {
    /// Stored by reference.
    pub const REFERENCE: StorageSpec = StorageSpec {
        inlineable: false,
        bits: 0,
        boxed_primitive: None,
    };

    /// A boxed 64-bit primitive.
    pub const fn boxed(kind: BoxedPrimitive) -> StorageSpec {
        StorageSpec {
            inlineable: true,
            bits: 64,
            boxed_primitive: Some(kind),
        }
    }
}

/// Input to `compose`.
#[derive(Debug, Clone, Default)]
pub struct ComposeInfo {
    /// Element kind for arrays
    pub array_type: Option<ArraySlotType>,
    /// Attribute names for opaque objects
    pub attributes: Vec<Arc<str>>,
    /// Buffer size for native objects
    pub native_size: Option<usize>,
    /// Library native objects are bound to
    pub library: Option<Arc<str>>,
}

/// Layout decided by `compose`; set once per STable.
#[derive(Debug, Clone)]
pub enum ReprData {
    /// Array element kind
    Array(ArraySlotType),
    /// Attribute names, slot index is position
    Opaque {
        /// Names of the attribute slots
        attributes: Vec<Arc<str>>,
    },
    /// Native layout
    Native {
        /// Interop flavour
        kind: NativeKind,
        /// Buffer size in bytes
        size: usize,
        /// Bound library and its open-handle count
        library: Option<(Arc<str>, Arc<AtomicUsize>)>,
    },
}

impl ReprData {
    /// Slot of a named attribute.
    pub fn attribute_slot(&self, name: &str) -> Option<usize> {
        match self {
            ReprData::Opaque { attributes } => attributes.iter().position(|a| &**a == name),
            _ => None,
        }
    }
}

/// The required part of every REPR.
pub trait Repr: Send + Sync + fmt::Debug {
    /// REPR name, unique within a registry.
    fn name(&self) -> &'static str;

    /// Produces a zeroed body for a new instance of `st`.
    fn allocate(&self, st: &STable) -> VmResult<ObjectBody>;

    /// Accounted body size in bytes, excluding the header.
    fn body_size(&self, body: &ObjectBody) -> usize;

    /// How values of the type are stored.
    fn storage_spec(&self, _st: &STable) -> StorageSpec {
        StorageSpec::REFERENCE
    }

    /// Initialization capability.
    fn initializable(&self) -> Option<&dyn Initializable> {
        None
    }

    /// Marking capability; REPRs without references have none.
    fn markable(&self) -> Option<&dyn Markable> {
        None
    }

    /// Copying capability.
    fn copyable(&self) -> Option<&dyn Copyable> {
        None
    }

    /// Freeing capability; only REPRs owning non-GC resources have one.
    fn freeable(&self) -> Option<&dyn Freeable> {
        None
    }

    /// Composition capability. A REPR with this capability must be composed
    /// before its first allocation.
    fn composable(&self) -> Option<&dyn Composable> {
        None
    }
}

/// REPR-specific setup after allocation.
pub trait Initializable {
    /// Sets up a freshly allocated body.
    fn initialize(&self, st: &STable, body: &mut ObjectBody) -> VmResult<()>;
}

/// Enumeration of strong references.
pub trait Markable {
    /// Pushes every object the body references.
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist);
}

/// Copying that honours ownership.
pub trait Copyable {
    /// Produces the body of a copy of `src`.
    fn copy(&self, st: &STable, src: &ObjectBody) -> VmResult<ObjectBody>;
}

/// Release of resources the GC does not manage.
pub trait Freeable {
    /// Releases resources held by a dead object's body.
    fn free(&self, body: &mut ObjectBody);
}

/// One-time layout finalization.
pub trait Composable {
    /// Computes the layout for `st` from `info`.
    fn compose(&self, st: &STable, info: &ComposeInfo) -> VmResult<ReprData>;
}

/// Which optional capabilities a REPR provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Has `initialize`
    pub initialize: bool,
    /// Has `mark`
    pub mark: bool,
    /// Has `copy`
    pub copy: bool,
    /// Has `free`
    pub free: bool,
    /// Has `compose`
    pub compose: bool,
}

/// A registered REPR.
#[derive(Debug, Clone)]
pub struct ReprEntry {
    /// Registry index
    pub id: ReprId,
    /// The REPR
    pub repr: Arc<dyn Repr>,
    /// Capabilities, resolved at registration
    pub capabilities: Capabilities,
}

impl ReprEntry {
    fn new(id: ReprId, repr: Arc<dyn Repr>) -> Self {
        let capabilities = Capabilities {
            initialize: repr.initializable().is_some(),
            mark: repr.markable().is_some(),
            copy: repr.copyable().is_some(),
            free: repr.freeable().is_some(),
            compose: repr.composable().is_some(),
        };
        ReprEntry {
            id,
            repr,
            capabilities,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    entries: Vec<ReprEntry>,
    by_name: HashMap<&'static str, ReprId>,
}

/// Registry of REPRs, shared by every thread of an instance.
#[derive(Debug, Default)]
pub struct ReprRegistry {
    tables: RwLock<Tables>,
}

impl ReprRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in REPR.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for repr in crate::reprs::builtins() {
            // Built-in names are distinct
            let _ = registry.register(repr);
        }
        registry
    }

    /// Registers a REPR. Names must be unique.
    pub fn register(&self, repr: Arc<dyn Repr>) -> VmResult<ReprId> {
        let mut tables = self.tables.write();
        let name = repr.name();
        if tables.by_name.contains_key(name) {
            return Err(VmError::adhoc(
                ErrorKind::Repr,
                format!("REPR '{}' is already registered", name),
            ));
        }
        let id = ReprId(tables.entries.len() as u16);
        let entry = ReprEntry::new(id, repr);
        log::debug!("registered REPR '{}' as {:?} {:?}", name, id, entry.capabilities);
        tables.entries.push(entry);
        tables.by_name.insert(name, id);
        Ok(id)
    }

    /// Looks a REPR up by name.
    pub fn lookup(&self, name: &str) -> VmResult<ReprEntry> {
        let tables = self.tables.read();
        tables
            .by_name
            .get(name)
            .map(|id| tables.entries[id.0 as usize].clone())
            .ok_or_else(|| VmError::adhoc(ErrorKind::Repr, format!("Unknown REPR '{}'", name)))
    }

    /// Looks a REPR up by id.
    pub fn get(&self, id: ReprId) -> Option<ReprEntry> {
        self.tables.read().entries.get(id.0 as usize).cloned()
    }

    /// Number of registered REPRs.
    pub fn len(&self) -> usize {
        self.tables.read().entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
