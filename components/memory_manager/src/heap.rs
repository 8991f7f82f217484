//! The garbage-collected heap
//!
//! This module implements a generational heap with:
//! - Per-thread nurseries: semispace copying collector
//! - Second generation: size-classed pages, mark and sweep
//! - A write barrier funnel maintaining per-thread remembered sets
//!
//! Objects are addressed through handles. Each handle owns a slot in the
//! handle table holding the object behind its own read-write lock plus the
//! object's current location, so moving an object during a collection only
//! rewrites its location; handles held in registers, frames and other
//! objects stay valid.
//!
//! There is no heap-wide lock. Each thread allocates into its own space (a
//! nursery, a remembered set and a handle free list) behind a mutex that
//! only that thread and the collector take. Gen2 sits behind its own mutex,
//! taken for promotion, collection and type objects. Reads and stores lock
//! the one object they touch, and every store goes through
//! [`Heap::set_ref`]. Collection runs while every mutator is stopped at a
//! safepoint or blocked.
//!
//! Lock order: thread spaces (by id), then gen2, then single objects. No
//! object guard is held while a space or gen2 lock is requested.

use crate::config::HeapConfig;
use crate::error::{AllocError, HeapInvariantViolation};
use crate::gen2::Gen2;
use crate::header::{align_size, CollectableHeader, HeaderFlags, Location, HEADER_SIZE};
use crate::nursery::{Nursery, NurserySlot};
use crate::object::{
    AsyncTaskBody, CodeBody, ContainerBody, ContinuationBody, ExternalHandle, HeapObject,
    ObjectBody,
};
use crate::stable::STable;
use crate::table::SegmentedTable;
use crate::worklist::Worklist;
use crate::write_barrier::{barrier_action, BarrierAction, RememberedSet};
use bytecode_system::Reg;
use callstack::{DetachedStack, FrameEnv};
use core_types::{
    vm_panic, ErrorKind, ObjRef, ObjectInspector, StableId, StaticFrameId, ThreadId, Value,
    VmError, VmResult, PANIC_ALLOC, PANIC_GC, PANIC_STACK,
};
use crossbeam::atomic::AtomicCell;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, MutexGuard, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::fmt;
use std::mem::discriminant;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared access to one heap object. Only writers of that object wait on it.
pub type ObjectGuard<'a> = MappedRwLockReadGuard<'a, HeapObject>;

/// Shared access to part of an object's body.
pub type BodyGuard<'a, T> = MappedRwLockReadGuard<'a, T>;

type ObjectGuardMut<'a> = MappedRwLockWriteGuard<'a, HeapObject>;

/// Which generations a collection covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Nurseries only
    Minor,
    /// Nurseries, then a gen2 mark and sweep
    Full,
}

/// Outcome of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Objects copied within a nursery
    pub survivors: usize,
    /// Objects promoted to gen2
    pub promoted: usize,
    /// Nursery objects freed
    pub freed: usize,
    /// Gen2 objects freed by the sweep
    pub gen2_freed: usize,
}

/// Running totals.
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Minor collections run
    pub minor_collections: u64,
    /// Full collections run
    pub full_collections: u64,
    /// Objects promoted to gen2
    pub objects_promoted: u64,
    /// Objects freed, both generations
    pub objects_freed: u64,
    /// Bytes promoted to gen2
    pub bytes_promoted: u64,
    /// Stores that added an owner to a remembered set
    pub barrier_hits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    minor_collections: AtomicU64,
    full_collections: AtomicU64,
    objects_promoted: AtomicU64,
    objects_freed: AtomicU64,
    bytes_promoted: AtomicU64,
    barrier_hits: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GcStats {
        GcStats {
            minor_collections: self.minor_collections.load(Ordering::Relaxed),
            full_collections: self.full_collections.load(Ordering::Relaxed),
            objects_promoted: self.objects_promoted.load(Ordering::Relaxed),
            objects_freed: self.objects_freed.load(Ordering::Relaxed),
            bytes_promoted: self.bytes_promoted.load(Ordering::Relaxed),
            barrier_hits: self.barrier_hits.load(Ordering::Relaxed),
        }
    }
}

/// Storage behind one handle.
#[derive(Debug)]
struct HandleSlot {
    location: AtomicCell<Location>,
    object: RwLock<Option<HeapObject>>,
}

impl Default for HandleSlot {
    fn default() -> Self {
        HandleSlot {
            location: AtomicCell::new(Location::Free),
            object: RwLock::new(None),
        }
    }
}

/// Allocation state owned by one mutator thread.
#[derive(Debug)]
struct ThreadSpace {
    nursery: Nursery,
    remembered: RememberedSet,
    free_handles: Vec<u32>,
}

impl ThreadSpace {
    fn new(thread: ThreadId, nursery_size: usize) -> Self {
        ThreadSpace {
            nursery: Nursery::new(thread, nursery_size),
            remembered: RememberedSet::new(),
            free_handles: Vec::new(),
        }
    }
}

fn children(obj: &HeapObject, worklist: &mut Worklist) {
    if let Some(markable) = obj.stable.repr().markable() {
        markable.mark(&obj.body, worklist);
    }
}

fn release_resources(obj: &mut HeapObject) {
    if let Some(freeable) = obj.stable.repr().freeable() {
        freeable.free(&mut obj.body);
    }
}

/// Generational heap shared by the threads of one instance.
pub struct Heap {
    config: HeapConfig,
    handles: SegmentedTable<HandleSlot>,
    next_handle: AtomicU64,
    spaces: SegmentedTable<OnceLock<Mutex<ThreadSpace>>>,
    thread_count: AtomicUsize,
    gen2: Mutex<Gen2>,
    permanent_roots: Mutex<Vec<ObjRef>>,
    promoted_since_full: AtomicUsize,
    counters: Counters,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("handles_issued", &self.next_handle.load(Ordering::Relaxed))
            .field("threads", &self.thread_count.load(Ordering::Relaxed))
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

impl Heap {
    /// Creates an empty heap.
    pub fn new(config: HeapConfig) -> Self {
        Heap {
            config,
            handles: SegmentedTable::new(),
            next_handle: AtomicU64::new(0),
            spaces: SegmentedTable::new(),
            thread_count: AtomicUsize::new(0),
            gen2: Mutex::new(Gen2::new()),
            permanent_roots: Mutex::new(Vec::new()),
            promoted_since_full: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Running totals.
    pub fn stats(&self) -> GcStats {
        self.counters.snapshot()
    }

    /// The second generation, locked.
    pub fn gen2(&self) -> MutexGuard<'_, Gen2> {
        self.gen2.lock()
    }

    fn space(&self, tc: ThreadId) -> &Mutex<ThreadSpace> {
        let Some(cell) = self.spaces.get_or_create(tc.index()) else {
            vm_panic(PANIC_ALLOC, &format!("no room for thread {} in the heap", tc.0));
        };
        cell.get_or_init(|| {
            self.thread_count.fetch_max(tc.index() + 1, Ordering::AcqRel);
            Mutex::new(ThreadSpace::new(tc, self.config.nursery_size))
        })
    }

    fn existing_space(&self, index: usize) -> Option<&Mutex<ThreadSpace>> {
        self.spaces.get(index).and_then(OnceLock::get)
    }

    /// Makes sure `tc` has a nursery and a remembered set.
    pub fn ensure_thread(&self, tc: ThreadId) {
        self.space(tc);
    }

    /// Number of owners in the remembered set of `tc`.
    pub fn remembered_len(&self, tc: ThreadId) -> usize {
        self.existing_space(tc.index())
            .map_or(0, |s| s.lock().remembered.len())
    }

    /// Number of objects in the nursery of `tc`.
    pub fn nursery_len(&self, tc: ThreadId) -> usize {
        self.existing_space(tc.index()).map_or(0, |s| s.lock().nursery.len())
    }

    /// True if `tc` allocated past its nursery limit.
    pub fn wants_collection(&self, tc: ThreadId) -> bool {
        self.existing_space(tc.index())
            .map_or(false, |s| s.lock().nursery.over_limit())
    }

    /// True once enough has been promoted to warrant a full collection.
    pub fn wants_full_collection(&self) -> bool {
        self.promoted_since_full.load(Ordering::Acquire) >= self.config.full_collection_threshold
    }

    /// Total live objects, both generations.
    pub fn live_objects(&self) -> usize {
        let old = self.gen2.lock().live_objects();
        let young: usize = (0..self.thread_count.load(Ordering::Acquire))
            .filter_map(|i| self.existing_space(i))
            .map(|s| s.lock().nursery.len())
            .sum();
        old + young
    }

    /// Registers an object that is always a root.
    pub fn add_permanent_root(&self, obj: ObjRef) {
        self.permanent_roots.lock().push(obj);
    }

    // ========== Handles ==========

    fn issue_handle(&self) -> ObjRef {
        let index = self.next_handle.fetch_add(1, Ordering::Relaxed);
        if index > u32::MAX as u64 || self.handles.get_or_create(index as usize).is_none() {
            vm_panic(PANIC_ALLOC, &AllocError::HandlesExhausted.to_string());
        }
        ObjRef::from_index(index as u32)
    }

    fn slot(&self, obj: ObjRef) -> Option<&HandleSlot> {
        self.handles.get(obj.index())
    }

    fn accounted_size(st: &STable, body: &ObjectBody) -> usize {
        let size = align_size(HEADER_SIZE + st.repr().body_size(body));
        if size > u32::MAX as usize {
            vm_panic(PANIC_ALLOC, &AllocError::TooLarge(size).to_string());
        }
        size
    }

    /// Where the object behind `obj` lives.
    pub fn location(&self, obj: ObjRef) -> Location {
        self.slot(obj).map_or(Location::Free, |s| s.location.load())
    }

    /// True if `obj` refers to a live object.
    pub fn is_alive(&self, obj: ObjRef) -> bool {
        self.location(obj) != Location::Free
    }

    /// True if `obj` lives in a nursery.
    pub fn is_nursery(&self, obj: ObjRef) -> bool {
        matches!(self.location(obj), Location::Nursery { .. })
    }

    /// True if `obj` lives in gen2.
    pub fn is_gen2(&self, obj: ObjRef) -> bool {
        matches!(self.location(obj), Location::Gen2(_))
    }

    // ========== Allocation ==========

    /// Bump-allocates into the nursery of `tc`. Only that thread's space is
    /// locked.
    fn place(&self, tc: ThreadId, st: &Arc<STable>, body: ObjectBody) -> ObjRef {
        let size = Self::accounted_size(st, &body);
        let mut space = self.space(tc).lock();
        let handle = match space.free_handles.pop() {
            Some(index) => ObjRef::from_index(index),
            None => self.issue_handle(),
        };
        let index = space.nursery.allocate(handle, size);
        let Some(slot) = self.slot(handle) else {
            vm_panic(PANIC_ALLOC, &format!("handle {} has no storage", handle));
        };
        *slot.object.write() = Some(HeapObject {
            header: CollectableHeader::new(handle, tc, size),
            stable: st.clone(),
            body,
        });
        slot.location.store(Location::Nursery { thread: tc, index });
        handle
    }

    /// Allocates an object with a prepared body, checking that the body
    /// belongs to the type's REPR.
    fn place_checked(&self, tc: ThreadId, st: &Arc<STable>, body: ObjectBody) -> VmResult<ObjRef> {
        let template = st.repr().allocate(st)?;
        if discriminant(&template) != discriminant(&body) {
            return Err(VmError::adhoc(
                ErrorKind::Repr,
                format!(
                    "Cannot store a {} in an object of REPR {}",
                    body.describe(),
                    st.repr().name()
                ),
            ));
        }
        Ok(self.place(tc, st, body))
    }

    /// The type object of `st`, created in gen2 on first request.
    pub fn type_object(&self, st: &Arc<STable>) -> ObjRef {
        if let Some(obj) = st.type_object() {
            return obj;
        }
        let mut gen2 = self.gen2.lock();
        // Another thread may have created it while we waited
        if let Some(obj) = st.type_object() {
            return obj;
        }
        let handle = self.issue_handle();
        let size = align_size(HEADER_SIZE);
        let mut header = CollectableHeader::new(handle, ThreadId(0), size);
        header.flags.insert(HeaderFlags::TYPE_OBJECT);
        header.flags.insert(HeaderFlags::SECOND_GEN);
        let at = gen2.allocate(handle, size);
        if let Some(slot) = self.slot(handle) {
            *slot.object.write() = Some(HeapObject {
                header,
                stable: st.clone(),
                body: ObjectBody::TypeObject,
            });
            slot.location.store(Location::Gen2(at));
        }
        self.permanent_roots.lock().push(handle);
        st.set_type_object(handle);
        drop(gen2);
        log::trace!("type object {} for '{}'", handle, st.name());
        handle
    }

    /// Allocates a zeroed instance of `st` in the nursery of `tc`.
    ///
    /// Allocation never triggers a collection; past the nursery limit it
    /// only makes [`Heap::wants_collection`] true.
    pub fn allocate(&self, tc: ThreadId, st: &Arc<STable>) -> VmResult<ObjRef> {
        if st.needs_compose() {
            return Err(VmError::adhoc(
                ErrorKind::Compose,
                format!("Type '{}' must be composed before allocation", st.name()),
            ));
        }
        let body = st.repr().allocate(st)?;
        Ok(self.place(tc, st, body))
    }

    /// Runs the REPR's initializer, if it has one.
    pub fn initialize(&self, obj: ObjRef) -> VmResult<()> {
        let mut guard = self.get_mut(obj);
        let HeapObject { stable, body, .. } = &mut *guard;
        if let Some(init) = stable.repr().initializable() {
            init.initialize(stable, body)?;
        }
        Ok(())
    }

    /// Allocates and initializes.
    pub fn create(&self, tc: ThreadId, st: &Arc<STable>) -> VmResult<ObjRef> {
        let obj = self.allocate(tc, st)?;
        self.initialize(obj)?;
        Ok(obj)
    }

    /// REPR-level copy. Type objects are their own copy.
    pub fn clone_object(&self, tc: ThreadId, obj: ObjRef) -> VmResult<ObjRef> {
        let (st, body) = {
            let o = self.get(obj);
            if o.header.is_type_object() {
                return Ok(obj);
            }
            let st = o.stable.clone();
            let copier = st.repr().copyable().ok_or_else(|| {
                VmError::adhoc(
                    ErrorKind::Repr,
                    format!("REPR {} cannot be copied", st.repr().name()),
                )
            })?;
            let body = copier.copy(&st, &o.body)?;
            (st, body)
        };
        Ok(self.place(tc, &st, body))
    }

    // ========== Access ==========

    /// The object behind `obj`, or `None` for a freed handle.
    ///
    /// The guard locks only this object; drop it before storing into the
    /// same object.
    pub fn object(&self, obj: ObjRef) -> Option<ObjectGuard<'_>> {
        let slot = self.slot(obj)?;
        RwLockReadGuard::try_map(slot.object.read_recursive(), Option::as_ref).ok()
    }

    fn object_mut(&self, obj: ObjRef) -> Option<ObjectGuardMut<'_>> {
        let slot = self.slot(obj)?;
        RwLockWriteGuard::try_map(slot.object.write(), Option::as_mut).ok()
    }

    /// The object behind a handle the caller knows to be live.
    ///
    /// A dead handle here means a root was missed; that is fatal.
    pub fn get(&self, obj: ObjRef) -> ObjectGuard<'_> {
        match self.object(obj) {
            Some(o) => o,
            None => vm_panic(PANIC_GC, &format!("use of freed handle {}", obj)),
        }
    }

    fn get_mut(&self, obj: ObjRef) -> ObjectGuardMut<'_> {
        match self.object_mut(obj) {
            Some(o) => o,
            None => vm_panic(PANIC_GC, &format!("use of freed handle {}", obj)),
        }
    }

    fn concrete(&self, obj: ObjRef, op: &str) -> VmResult<ObjectGuard<'_>> {
        let o = self.get(obj);
        if o.header.is_type_object() {
            return Err(VmError::type_object(op, o.stable.name()));
        }
        Ok(o)
    }

    /// STable of `obj`.
    pub fn stable(&self, obj: ObjRef) -> Arc<STable> {
        self.get(obj).stable.clone()
    }

    /// True if `obj` is a type object.
    pub fn is_type_object(&self, obj: ObjRef) -> bool {
        self.get(obj).header.is_type_object()
    }

    // ========== Reference stores ==========

    /// The single path for mutating an object's body.
    ///
    /// `stored` is the value being written; if it references a nursery
    /// object while `owner` is in gen2, the owner is added to the remembered
    /// set of `tc`. Type objects have no body to write. Only `owner` is
    /// locked while `write` runs.
    pub fn set_ref<R>(
        &self,
        tc: ThreadId,
        owner: ObjRef,
        stored: &Value,
        write: impl FnOnce(&mut ObjectBody) -> VmResult<R>,
    ) -> VmResult<R> {
        let stored_in_nursery = stored.as_obj().map_or(false, |o| self.is_nursery(o));
        let mut obj = self.get_mut(owner);
        if obj.header.is_type_object() {
            return Err(VmError::type_object("modify", obj.stable.name()));
        }
        let action = barrier_action(
            obj.header.is_gen2(),
            obj.header.flags.contains(HeaderFlags::IN_REMEMBERED_SET),
            stored_in_nursery,
        );
        let result = write(&mut obj.body)?;
        if action == BarrierAction::Remember {
            obj.header.flags.insert(HeaderFlags::IN_REMEMBERED_SET);
            drop(obj);
            self.space(tc).lock().remembered.add(owner);
            self.counters.barrier_hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("write barrier remembered {} on thread {}", owner, tc.0);
        }
        Ok(result)
    }

    // ========== Boxing ==========

    /// Allocates an instance of `st` boxing `value`.
    pub fn box_value(&self, tc: ThreadId, st: &Arc<STable>, value: Value) -> VmResult<ObjRef> {
        let body = match (st.repr().name(), value) {
            ("P6int", Value::Int(i)) => ObjectBody::Int(i),
            ("P6num", Value::Num(n)) => ObjectBody::Num(n),
            ("P6num", Value::Int(i)) => ObjectBody::Num(i as f64),
            ("P6str", Value::Str(s)) => ObjectBody::Str(s),
            ("P6bigint", Value::Int(i)) => ObjectBody::BigInt(BigInt::from(i)),
            (repr, value) => {
                return Err(VmError::type_check(format!(
                    "Cannot box a {:?} value into REPR {}",
                    value.kind(),
                    repr
                )))
            }
        };
        self.place_checked(tc, st, body)
    }

    /// Boxes an arbitrary-precision integer.
    pub fn box_bigint(&self, tc: ThreadId, st: &Arc<STable>, value: BigInt) -> VmResult<ObjRef> {
        self.place_checked(tc, st, ObjectBody::BigInt(value))
    }

    /// Native integer held by a box.
    pub fn unbox_int(&self, obj: ObjRef) -> VmResult<i64> {
        match &self.concrete(obj, "unbox")?.body {
            ObjectBody::Int(i) => Ok(*i),
            ObjectBody::BigInt(b) => b.to_i64().ok_or_else(|| {
                VmError::adhoc(ErrorKind::Bounds, "Big integer does not fit in a native int")
            }),
            other => Err(VmError::type_check(format!(
                "Cannot unbox a {} as a native int",
                other.describe()
            ))),
        }
    }

    /// Native float held by a box.
    pub fn unbox_num(&self, obj: ObjRef) -> VmResult<f64> {
        match &self.concrete(obj, "unbox")?.body {
            ObjectBody::Num(n) => Ok(*n),
            ObjectBody::Int(i) => Ok(*i as f64),
            ObjectBody::BigInt(b) => Ok(b.to_f64().unwrap_or(f64::NAN)),
            other => Err(VmError::type_check(format!(
                "Cannot unbox a {} as a native num",
                other.describe()
            ))),
        }
    }

    /// String held by a box.
    pub fn unbox_str(&self, obj: ObjRef) -> VmResult<Arc<str>> {
        match &self.concrete(obj, "unbox")?.body {
            ObjectBody::Str(s) => Ok(s.clone()),
            other => Err(VmError::type_check(format!(
                "Cannot unbox a {} as a native str",
                other.describe()
            ))),
        }
    }

    /// Big integer held by a box.
    pub fn unbox_bigint(&self, obj: ObjRef) -> VmResult<BigInt> {
        match &self.concrete(obj, "unbox")?.body {
            ObjectBody::BigInt(b) => Ok(b.clone()),
            ObjectBody::Int(i) => Ok(BigInt::from(*i)),
            other => Err(VmError::type_check(format!(
                "Cannot unbox a {} as a big integer",
                other.describe()
            ))),
        }
    }

    // ========== Attributes ==========

    /// Reads attribute `slot`.
    pub fn get_attribute(&self, obj: ObjRef, slot: usize) -> VmResult<Value> {
        match &self.concrete(obj, "get an attribute of")?.body {
            ObjectBody::Opaque(o) => o.get(slot),
            ObjectBody::Native(n) => n.children.get(slot).cloned().ok_or_else(|| {
                VmError::adhoc(ErrorKind::Bounds, format!("No attribute in slot {}", slot))
            }),
            other => Err(VmError::adhoc(
                ErrorKind::Repr,
                format!("A {} has no attributes", other.describe()),
            )),
        }
    }

    /// Writes attribute `slot`.
    pub fn bind_attribute(&self, tc: ThreadId, obj: ObjRef, slot: usize, value: Value) -> VmResult<()> {
        let stored = value.clone();
        self.set_ref(tc, obj, &stored, move |body| match body {
            ObjectBody::Opaque(o) => o.bind(slot, value),
            ObjectBody::Native(n) => {
                if slot >= n.children.len() {
                    n.children.resize(slot + 1, Value::Null);
                }
                n.children[slot] = value;
                Ok(())
            }
            other => Err(VmError::adhoc(
                ErrorKind::Repr,
                format!("A {} has no attributes", other.describe()),
            )),
        })
    }

    // ========== Positional ==========

    fn not_positional(body: &ObjectBody) -> VmError {
        VmError::adhoc(
            ErrorKind::Repr,
            format!("A {} does not support positional access", body.describe()),
        )
    }

    /// Appends to an array.
    pub fn array_push(&self, tc: ThreadId, arr: ObjRef, value: Value) -> VmResult<()> {
        let stored = value.clone();
        self.set_ref(tc, arr, &stored, move |body| match body {
            ObjectBody::Array(a) => a.push(value),
            other => Err(Self::not_positional(other)),
        })
    }

    /// Reads an array element.
    pub fn array_at(&self, arr: ObjRef, index: i64) -> VmResult<Value> {
        match &self.concrete(arr, "index")?.body {
            ObjectBody::Array(a) => Ok(a.at_pos(index)),
            other => Err(Self::not_positional(other)),
        }
    }

    /// Writes an array element.
    pub fn array_bind(&self, tc: ThreadId, arr: ObjRef, index: i64, value: Value) -> VmResult<()> {
        let stored = value.clone();
        self.set_ref(tc, arr, &stored, move |body| match body {
            ObjectBody::Array(a) => a.bind_pos(index, value),
            other => Err(Self::not_positional(other)),
        })
    }

    /// Number of array elements.
    pub fn array_elems(&self, arr: ObjRef) -> VmResult<i64> {
        match &self.concrete(arr, "count the elements of")?.body {
            ObjectBody::Array(a) => Ok(a.elems.len() as i64),
            other => Err(Self::not_positional(other)),
        }
    }

    // ========== Containers ==========

    /// Allocates a `Scalar` container holding `value`.
    pub fn new_container(&self, tc: ThreadId, st: &Arc<STable>, value: Value, rw: bool) -> VmResult<ObjRef> {
        self.place_checked(tc, st, ObjectBody::Container(ContainerBody { value, rw }))
    }

    /// The value inside a container; any other object is its own value.
    pub fn decont(&self, obj: ObjRef) -> Value {
        match &self.get(obj).body {
            ObjectBody::Container(c) => c.value.clone(),
            _ => Value::Obj(obj),
        }
    }

    /// Stores into an rw container.
    pub fn assign(&self, tc: ThreadId, container: ObjRef, value: Value) -> VmResult<()> {
        let stored = value.clone();
        self.set_ref(tc, container, &stored, move |body| match body {
            ObjectBody::Container(c) if c.rw => {
                c.value = value;
                Ok(())
            }
            ObjectBody::Container(_) => Err(VmError::type_check("Cannot assign to a readonly container")),
            other => Err(VmError::type_check(format!("Cannot assign to a {}", other.describe()))),
        })
    }

    // ========== Code and frames ==========

    /// Allocates a code object.
    pub fn new_code(
        &self,
        tc: ThreadId,
        st: &Arc<STable>,
        static_frame: StaticFrameId,
        name: &str,
        outer: Option<ObjRef>,
    ) -> VmResult<ObjRef> {
        let body = ObjectBody::Code(CodeBody {
            static_frame,
            name: Arc::from(name),
            outer,
        });
        self.place_checked(tc, st, body)
    }

    /// Body of a code object.
    pub fn code(&self, obj: ObjRef) -> VmResult<BodyGuard<'_, CodeBody>> {
        let o = self.concrete(obj, "invoke")?;
        MappedRwLockReadGuard::try_map(o, |o| match &o.body {
            ObjectBody::Code(c) => Some(c),
            _ => None,
        })
        .map_err(|o| VmError::type_check(format!("Cannot invoke a {}", o.body.describe())))
    }

    /// Sets the captured outer of a code object.
    pub fn set_code_outer(&self, tc: ThreadId, code: ObjRef, outer: ObjRef) -> VmResult<()> {
        self.set_ref(tc, code, &Value::Obj(outer), |body| match body {
            ObjectBody::Code(c) => {
                c.outer = Some(outer);
                Ok(())
            }
            other => Err(VmError::type_check(format!("Cannot capture into a {}", other.describe()))),
        })
    }

    /// Allocates a heap frame holding `env`.
    pub fn new_frame(&self, tc: ThreadId, st: &Arc<STable>, env: FrameEnv) -> VmResult<ObjRef> {
        self.place_checked(tc, st, ObjectBody::Frame(env))
    }

    /// Environment of a heap frame.
    pub fn frame_env(&self, frame: ObjRef) -> VmResult<BodyGuard<'_, FrameEnv>> {
        let o = self.concrete(frame, "read a frame from")?;
        MappedRwLockReadGuard::try_map(o, |o| match &o.body {
            ObjectBody::Frame(env) => Some(env),
            _ => None,
        })
        .map_err(|o| VmError::type_check(format!("A {} is not a frame", o.body.describe())))
    }

    /// Reads a lexical of a heap frame.
    pub fn frame_lexical(&self, frame: ObjRef, index: usize) -> VmResult<Value> {
        self.frame_env(frame)?
            .lexicals
            .get(index)
            .cloned()
            .ok_or_else(|| VmError::adhoc(ErrorKind::Bounds, format!("No lexical in slot {}", index)))
    }

    /// Writes a lexical of a heap frame.
    pub fn bind_frame_lexical(&self, tc: ThreadId, frame: ObjRef, index: usize, value: Value) -> VmResult<()> {
        let stored = value.clone();
        self.set_ref(tc, frame, &stored, move |body| match body {
            ObjectBody::Frame(env) => match env.lexicals.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(VmError::adhoc(ErrorKind::Bounds, format!("No lexical in slot {}", index))),
            },
            other => Err(VmError::type_check(format!("A {} is not a frame", other.describe()))),
        })
    }

    // ========== Continuations ==========

    /// Allocates a continuation over a detached region chain.
    pub fn new_continuation(
        &self,
        tc: ThreadId,
        st: &Arc<STable>,
        detached: DetachedStack,
        result_reg: Reg,
    ) -> VmResult<ObjRef> {
        let body = ObjectBody::Continuation(ContinuationBody {
            detached: Some(detached),
            result_reg,
            invoked: AtomicBool::new(false),
        });
        self.place_checked(tc, st, body)
    }

    /// Claims a continuation for invocation and takes its regions.
    ///
    /// `check` sees the captured regions first; if it fails, the
    /// continuation is left unclaimed and intact. Only the first claim
    /// succeeds.
    pub fn take_continuation(
        &self,
        obj: ObjRef,
        check: impl FnOnce(&DetachedStack, Reg) -> VmResult<()>,
    ) -> VmResult<(DetachedStack, Reg)> {
        let mut o = self.get_mut(obj);
        if o.header.is_type_object() {
            return Err(VmError::type_object("invoke", o.stable.name()));
        }
        match &mut o.body {
            ObjectBody::Continuation(c) => {
                let Some(detached) = c.detached.as_ref().filter(|_| !c.is_invoked()) else {
                    return Err(VmError::adhoc(
                        ErrorKind::Continuation,
                        "Continuation has already been invoked",
                    ));
                };
                check(detached, c.result_reg)?;
                if !c.claim() {
                    return Err(VmError::adhoc(
                        ErrorKind::Continuation,
                        "Continuation has already been invoked",
                    ));
                }
                match c.detached.take() {
                    Some(detached) => Ok((detached, c.result_reg)),
                    None => vm_panic(PANIC_STACK, "continuation has no captured regions"),
                }
            }
            other => Err(VmError::type_check(format!(
                "Cannot invoke a {} as a continuation",
                other.describe()
            ))),
        }
    }

    // ========== Async tasks and native memory ==========

    /// Allocates an async task.
    pub fn new_async_task(
        &self,
        tc: ThreadId,
        st: &Arc<STable>,
        queue: Option<ObjRef>,
        schedulee: Option<ObjRef>,
        handle: Option<ExternalHandle>,
    ) -> VmResult<ObjRef> {
        let body = ObjectBody::AsyncTask(AsyncTaskBody {
            queue,
            schedulee,
            handle,
            cancelled: false,
        });
        self.place_checked(tc, st, body)
    }

    /// Marks a task cancelled and releases its handle.
    pub fn cancel_async_task(&self, tc: ThreadId, task: ObjRef) -> VmResult<()> {
        self.set_ref(tc, task, &Value::Null, |body| match body {
            ObjectBody::AsyncTask(t) => {
                t.cancelled = true;
                if let Some(handle) = t.handle.as_mut() {
                    handle.close();
                }
                Ok(())
            }
            other => Err(VmError::type_check(format!("A {} is not an async task", other.describe()))),
        })
    }

    /// Native memory of an interop object.
    pub fn native_buffer(&self, obj: ObjRef) -> VmResult<BodyGuard<'_, [u8]>> {
        let o = self.concrete(obj, "read native memory of")?;
        MappedRwLockReadGuard::try_map(o, |o| match &o.body {
            ObjectBody::Native(n) => Some(n.buffer.as_slice()),
            _ => None,
        })
        .map_err(|o| VmError::type_check(format!("A {} has no native memory", o.body.describe())))
    }

    /// Copies `bytes` into the native memory of `obj` at `offset`.
    pub fn write_native(&self, tc: ThreadId, obj: ObjRef, offset: usize, bytes: &[u8]) -> VmResult<()> {
        self.set_ref(tc, obj, &Value::Null, |body| match body {
            ObjectBody::Native(n) => {
                let size = n.buffer.len();
                let target = n.buffer.get_mut(offset..offset + bytes.len()).ok_or_else(|| {
                    VmError::adhoc(
                        ErrorKind::Bounds,
                        format!("Write of {} bytes at {} exceeds native size {}", bytes.len(), offset, size),
                    )
                })?;
                target.copy_from_slice(bytes);
                Ok(())
            }
            other => Err(VmError::type_check(format!("A {} has no native memory", other.describe()))),
        })
    }

    // ========== Collection ==========

    /// Runs a collection. Every mutator must be stopped.
    ///
    /// # Arguments
    ///
    /// * `kind` - Minor, or full (minor first, then gen2 mark and sweep)
    /// * `roots` - Every handle held by any thread's stack and registers
    pub fn collect(&self, kind: CollectionKind, roots: &[ObjRef]) -> GcReport {
        let permanent = self.permanent_roots.lock().clone();
        let mut collector = Collector {
            heap: self,
            spaces: (0..self.thread_count.load(Ordering::Acquire))
                .map(|i| self.existing_space(i).map(|s| s.lock()))
                .collect(),
            gen2: self.gen2.lock(),
            scan: Vec::new(),
            promoted: Vec::new(),
            bytes_promoted: 0,
            report: GcReport::default(),
        };
        collector.minor(roots, &permanent);
        if kind == CollectionKind::Full {
            collector.report.gen2_freed = collector.full(roots, &permanent);
        }
        let bytes_promoted = collector.bytes_promoted;
        let report = std::mem::take(&mut collector.report);
        drop(collector);

        Counters::add(&self.counters.minor_collections, 1);
        Counters::add(&self.counters.objects_promoted, report.promoted);
        Counters::add(&self.counters.objects_freed, report.freed + report.gen2_freed);
        Counters::add(&self.counters.bytes_promoted, bytes_promoted);
        if kind == CollectionKind::Full {
            self.promoted_since_full.store(0, Ordering::Release);
            Counters::add(&self.counters.full_collections, 1);
        } else {
            self.promoted_since_full.fetch_add(bytes_promoted, Ordering::AcqRel);
        }
        log::debug!(
            "{:?} collection: {} survived, {} promoted, {} freed, {} gen2 freed",
            kind,
            report.survivors,
            report.promoted,
            report.freed,
            report.gen2_freed
        );
        if self.config.verify_heap {
            if let Err(violation) = self.verify() {
                vm_panic(PANIC_GC, &violation.to_string());
            }
        }
        report
    }

    /// Checks the heap invariants.
    ///
    /// Every gen2 object that references a nursery object must be
    /// remembered, no object may reference a freed handle, and every
    /// location entry must point back at its own object.
    pub fn verify(&self) -> Result<(), HeapInvariantViolation> {
        let mut worklist = Worklist::new();
        {
            let gen2 = self.gen2.lock();
            for at in gen2.live_slots() {
                let Some(owner) = gen2.get(at) else {
                    continue;
                };
                if self.location(owner) != Location::Gen2(at) {
                    return Err(HeapInvariantViolation::HandleMismatch(owner));
                }
                let remembered = match self.object(owner) {
                    Some(obj) => {
                        children(&obj, &mut worklist);
                        obj.header.flags.contains(HeaderFlags::IN_REMEMBERED_SET)
                    }
                    None => return Err(HeapInvariantViolation::HandleMismatch(owner)),
                };
                for target in worklist.take() {
                    match self.location(target) {
                        Location::Free => {
                            return Err(HeapInvariantViolation::DanglingReference { owner, target })
                        }
                        Location::Nursery { .. } if !remembered => {
                            return Err(HeapInvariantViolation::UnrememberedOldToYoung { owner, target })
                        }
                        _ => {}
                    }
                }
            }
        }
        for i in 0..self.thread_count.load(Ordering::Acquire) {
            let Some(space) = self.existing_space(i) else {
                continue;
            };
            let space = space.lock();
            let thread = space.nursery.thread();
            for (index, obj) in space.nursery.residents() {
                if self.location(obj) != (Location::Nursery { thread, index }) {
                    return Err(HeapInvariantViolation::HandleMismatch(obj));
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn set_ref_unbarriered(&self, owner: ObjRef, write: impl FnOnce(&mut ObjectBody)) {
        write(&mut self.get_mut(owner).body);
    }
}

/// State of one stop-the-world collection. Holds every thread space and
/// gen2 for its whole run.
struct Collector<'h> {
    heap: &'h Heap,
    spaces: Vec<Option<MutexGuard<'h, ThreadSpace>>>,
    gen2: MutexGuard<'h, Gen2>,
    scan: Vec<ObjRef>,
    promoted: Vec<ObjRef>,
    bytes_promoted: usize,
    report: GcReport,
}

impl<'h> Collector<'h> {
    fn space_mut(&mut self, thread: ThreadId) -> &mut ThreadSpace {
        match self.spaces.get_mut(thread.index()).and_then(Option::as_mut) {
            Some(space) => space,
            None => vm_panic(PANIC_GC, &format!("thread {} has no heap space", thread.0)),
        }
    }

    fn minor(&mut self, roots: &[ObjRef], permanent: &[ObjRef]) {
        let mut from: Vec<Vec<NurserySlot>> = self
            .spaces
            .iter_mut()
            .map(|s| s.as_mut().map_or_else(Vec::new, |s| s.nursery.flip()))
            .collect();
        let remembered: Vec<ObjRef> = self
            .spaces
            .iter_mut()
            .flatten()
            .flat_map(|s| s.remembered.take())
            .collect();
        let heap = self.heap;
        let mut worklist = Worklist::new();

        for &root in roots.iter().chain(permanent) {
            self.evacuate(&mut from, root);
        }

        for &owner in &remembered {
            if let Some(mut obj) = heap.object_mut(owner) {
                obj.header.flags.remove(HeaderFlags::IN_REMEMBERED_SET);
                children(&obj, &mut worklist);
            }
            for child in worklist.take() {
                self.evacuate(&mut from, child);
            }
        }

        // Cheney scan over everything evacuated so far
        let mut cursor = 0;
        while cursor < self.scan.len() {
            let obj = self.scan[cursor];
            cursor += 1;
            if let Some(o) = heap.object(obj) {
                children(&o, &mut worklist);
            }
            for child in worklist.take() {
                self.evacuate(&mut from, child);
            }
        }

        for (thread, mut space) in from.into_iter().enumerate() {
            for slot in space.drain(..) {
                if let NurserySlot::Live(obj) = slot {
                    self.release(obj);
                    self.report.freed += 1;
                }
            }
            if let Some(s) = self.spaces[thread].as_mut() {
                s.nursery.recycle(space);
            }
        }

        let promoted = std::mem::take(&mut self.promoted);
        for owner in remembered.into_iter().chain(promoted) {
            self.remember_if_young_refs(owner);
        }
    }

    /// Moves a nursery object out of the from-space, leaving a forwarding
    /// tombstone. Objects that already survived once are promoted.
    fn evacuate(&mut self, from: &mut [Vec<NurserySlot>], obj: ObjRef) {
        let heap = self.heap;
        let Location::Nursery { thread, index } = heap.location(obj) else {
            return;
        };
        // A location past the from-space, or a slot not holding `obj`, means
        // it was already evacuated
        let Some(slot) = from
            .get_mut(thread.index())
            .and_then(|space| space.get_mut(index as usize))
        else {
            return;
        };
        if *slot != NurserySlot::Live(obj) {
            return;
        }
        let Some(mut moved) = heap.object_mut(obj) else {
            vm_panic(PANIC_GC, &format!("nursery handle {} has no object", obj));
        };
        let size = Heap::accounted_size(&moved.stable, &moved.body);
        moved.header.size = size as u32;
        let to = if moved.header.age >= heap.config.promote_age {
            moved.header.flags.insert(HeaderFlags::SECOND_GEN);
            self.bytes_promoted += size;
            self.promoted.push(obj);
            self.report.promoted += 1;
            Location::Gen2(self.gen2.allocate(obj, size))
        } else {
            moved.header.age += 1;
            self.report.survivors += 1;
            Location::Nursery {
                thread,
                index: self.space_mut(thread).nursery.allocate(obj, size),
            }
        };
        drop(moved);
        *slot = NurserySlot::Forwarded(to);
        if let Some(entry) = heap.slot(obj) {
            entry.location.store(to);
        }
        self.scan.push(obj);
    }

    /// Frees `obj` and gives its handle back to the thread that allocated it.
    fn release(&mut self, obj: ObjRef) {
        let Some(entry) = self.heap.slot(obj) else {
            return;
        };
        let taken = entry.object.write().take();
        entry.location.store(Location::Free);
        if let Some(mut dead) = taken {
            release_resources(&mut dead);
            let owner = dead.header.owner;
            self.space_mut(owner).free_handles.push(obj.index() as u32);
        }
    }

    fn remember_if_young_refs(&mut self, owner: ObjRef) {
        let heap = self.heap;
        let mut worklist = Worklist::new();
        let thread = match heap.object(owner) {
            Some(obj)
                if obj.header.is_gen2()
                    && !obj.header.flags.contains(HeaderFlags::IN_REMEMBERED_SET) =>
            {
                children(&obj, &mut worklist);
                obj.header.owner
            }
            _ => return,
        };
        if worklist.take().into_iter().any(|c| heap.is_nursery(c)) {
            if let Some(mut obj) = heap.object_mut(owner) {
                obj.header.flags.insert(HeaderFlags::IN_REMEMBERED_SET);
            }
            self.space_mut(thread).remembered.add(owner);
        }
    }

    fn full(&mut self, roots: &[ObjRef], permanent: &[ObjRef]) -> usize {
        let heap = self.heap;
        let mut worklist = Worklist::new();
        for &root in roots.iter().chain(permanent) {
            worklist.push(root);
        }
        while let Some(r) = worklist.pop() {
            let Some(mut obj) = heap.object_mut(r) else {
                continue;
            };
            if obj.header.flags.contains(HeaderFlags::MARKED) {
                continue;
            }
            obj.header.flags.insert(HeaderFlags::MARKED);
            children(&obj, &mut worklist);
        }

        let mut freed = 0;
        for at in self.gen2.live_slots() {
            let Some(handle) = self.gen2.get(at) else {
                continue;
            };
            let marked = match heap.object_mut(handle) {
                Some(mut obj) => {
                    let marked = obj.header.flags.contains(HeaderFlags::MARKED);
                    obj.header.flags.remove(HeaderFlags::MARKED);
                    marked
                }
                None => true,
            };
            if !marked && self.gen2.free(at).is_some() {
                self.release(handle);
                freed += 1;
            }
        }
        for space in self.spaces.iter().flatten() {
            for (_, obj) in space.nursery.residents() {
                if let Some(mut o) = heap.object_mut(obj) {
                    o.header.flags.remove(HeaderFlags::MARKED);
                }
            }
        }
        for space in self.spaces.iter_mut().flatten() {
            space.remembered.retain(|o| heap.is_alive(*o));
        }
        freed
    }
}

impl ObjectInspector for Heap {
    fn stable_of(&self, obj: ObjRef) -> Option<StableId> {
        self.object(obj).map(|o| o.stable.id())
    }

    fn is_concrete(&self, obj: ObjRef) -> bool {
        self.object(obj).map_or(false, |o| o.is_concrete())
    }

    fn decont(&self, obj: ObjRef) -> Option<Value> {
        match &self.object(obj)?.body {
            ObjectBody::Container(c) => Some(c.value.clone()),
            _ => None,
        }
    }

    fn is_rw_container(&self, obj: ObjRef) -> bool {
        matches!(
            self.object(obj).as_deref().map(|o| &o.body),
            Some(ObjectBody::Container(ContainerBody { rw: true, .. }))
        )
    }
}
