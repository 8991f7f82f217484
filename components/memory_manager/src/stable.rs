//! Shared type descriptors (STables)
//!
//! An STable is the per-type metadata every instance points at: its name,
//! REPR, composed layout and caches. STables are created once and live as
//! long as the instance; only the composed layout (set once) and the caches
//! change after creation.

use crate::repr::{ComposeInfo, Repr, ReprData, ReprEntry};
use core_types::{ErrorKind, ObjRef, StableId, Value, VmError, VmResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// What invoking an instance of the type does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationHandler {
    /// The instance is itself a code object
    Code,
    /// The code object to run is stored in an attribute slot
    AttributeCode(u16),
}

/// Per-type metadata.
#[derive(Debug)]
pub struct STable {
    id: StableId,
    name: Arc<str>,
    repr: ReprEntry,
    repr_data: OnceLock<ReprData>,
    mode_flags: AtomicU32,
    method_cache: RwLock<HashMap<Arc<str>, Value>>,
    type_check_cache: RwLock<Vec<StableId>>,
    invocation: RwLock<Option<InvocationHandler>>,
    type_object: OnceLock<ObjRef>,
}

impl STable {
    /// Mode flag: the type was finalized and may not gain methods
    pub const MODE_FINAL: u32 = 1;
    /// Mode flag: type checks must consult the type-check cache only
    pub const MODE_TYPE_CHECK_CACHE_AUTHORITATIVE: u32 = 2;

    fn new(id: StableId, name: &str, repr: ReprEntry) -> Self {
        STable {
            id,
            name: Arc::from(name),
            repr,
            repr_data: OnceLock::new(),
            mode_flags: AtomicU32::new(0),
            method_cache: RwLock::new(HashMap::new()),
            type_check_cache: RwLock::new(Vec::new()),
            invocation: RwLock::new(None),
            type_object: OnceLock::new(),
        }
    }

    /// Identifier of this STable.
    pub fn id(&self) -> StableId {
        self.id
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The REPR of every instance.
    pub fn repr(&self) -> &dyn Repr {
        &*self.repr.repr
    }

    /// The registry entry of the REPR.
    pub fn repr_entry(&self) -> &ReprEntry {
        &self.repr
    }

    /// Composed layout, once composed.
    pub fn repr_data(&self) -> Option<&ReprData> {
        self.repr_data.get()
    }

    /// True once composed.
    pub fn is_composed(&self) -> bool {
        self.repr_data.get().is_some()
    }

    /// True if instances cannot be allocated until the type is composed.
    pub fn needs_compose(&self) -> bool {
        self.repr.capabilities.compose && !self.is_composed()
    }

    /// Finalizes the layout. Fails if the REPR has nothing to compose or the
    /// type is already composed.
    pub fn compose(&self, info: &ComposeInfo) -> VmResult<()> {
        let composable = self.repr.repr.composable().ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::Compose,
                format!("REPR {} does not support composition", self.repr.repr.name()),
            )
        })?;
        if self.is_composed() {
            return Err(self.already_composed());
        }
        let data = composable.compose(self, info)?;
        self.repr_data.set(data).map_err(|_| self.already_composed())?;
        log::debug!("composed type '{}' ({})", self.name, self.repr.repr.name());
        Ok(())
    }

    fn already_composed(&self) -> VmError {
        VmError::adhoc(
            ErrorKind::Compose,
            format!("Type '{}' has already been composed", self.name),
        )
    }

    /// Sets a mode flag.
    pub fn set_mode_flag(&self, flag: u32) {
        self.mode_flags.fetch_or(flag, Ordering::AcqRel);
    }

    /// True if the mode flag is set.
    pub fn has_mode_flag(&self, flag: u32) -> bool {
        self.mode_flags.load(Ordering::Acquire) & flag != 0
    }

    /// Adds a method to the method cache.
    pub fn add_method(&self, name: &str, code: Value) -> VmResult<()> {
        if self.has_mode_flag(Self::MODE_FINAL) {
            return Err(VmError::adhoc(
                ErrorKind::Repr,
                format!("Cannot add method '{}' to final type '{}'", name, self.name),
            ));
        }
        self.method_cache.write().insert(Arc::from(name), code);
        Ok(())
    }

    /// Looks a method up in the method cache.
    pub fn find_method(&self, name: &str) -> Option<Value> {
        self.method_cache.read().get(name).cloned()
    }

    /// Replaces the type-check cache.
    pub fn set_type_check_cache(&self, types: Vec<StableId>) {
        *self.type_check_cache.write() = types;
    }

    /// True if an instance of this type satisfies a check against `other`.
    pub fn type_check(&self, other: StableId) -> bool {
        other == self.id || self.type_check_cache.read().contains(&other)
    }

    /// Sets how instances are invoked.
    pub fn set_invocation(&self, handler: InvocationHandler) {
        *self.invocation.write() = Some(handler);
    }

    /// How instances are invoked, if they can be.
    pub fn invocation(&self) -> Option<InvocationHandler> {
        *self.invocation.read()
    }

    /// The type object, once created.
    pub fn type_object(&self) -> Option<ObjRef> {
        self.type_object.get().copied()
    }

    pub(crate) fn set_type_object(&self, obj: ObjRef) -> bool {
        self.type_object.set(obj).is_ok()
    }
}

/// All STables of an instance, indexed by [`StableId`].
#[derive(Debug, Default)]
pub struct STableRegistry {
    stables: RwLock<Vec<Arc<STable>>>,
}

impl STableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new STable over `repr`.
    pub fn create(&self, name: &str, repr: ReprEntry) -> Arc<STable> {
        let mut stables = self.stables.write();
        let id = StableId(stables.len() as u32);
        let st = Arc::new(STable::new(id, name, repr));
        stables.push(st.clone());
        log::trace!("created STable {:?} '{}'", id, name);
        st
    }

    /// Looks an STable up by id.
    pub fn get(&self, id: StableId) -> Option<Arc<STable>> {
        self.stables.read().get(id.0 as usize).cloned()
    }

    /// Number of STables.
    pub fn len(&self) -> usize {
        self.stables.read().len()
    }

    /// True if there are none.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
