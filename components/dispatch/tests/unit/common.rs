//! Shared fixtures

use core_types::{ObjRef, ObjectInspector, StableId, Value};
use std::collections::HashMap;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone)]
pub struct FakeObject {
    pub stable: StableId,
    pub concrete: bool,
    pub content: Option<Value>,
    pub rw: bool,
}

/// A heap stand-in answering type queries from a table.
#[derive(Default)]
pub struct FakeHeap {
    objects: HashMap<ObjRef, FakeObject>,
}

impl FakeHeap {
    pub fn new() -> Self {
        init_logging();
        Self::default()
    }

    pub fn instance(&mut self, index: u32, stable: u32) -> ObjRef {
        self.insert(index, stable, true, None)
    }

    pub fn type_object(&mut self, index: u32, stable: u32) -> ObjRef {
        self.insert(index, stable, false, None)
    }

    pub fn container(&mut self, index: u32, content: Value) -> ObjRef {
        self.insert(index, 100, true, Some(content))
    }

    fn insert(&mut self, index: u32, stable: u32, concrete: bool, content: Option<Value>) -> ObjRef {
        let obj = ObjRef::from_index(index);
        self.objects.insert(
            obj,
            FakeObject {
                stable: StableId(stable),
                concrete,
                rw: content.is_some(),
                content,
            },
        );
        obj
    }
}

impl ObjectInspector for FakeHeap {
    fn stable_of(&self, obj: ObjRef) -> Option<StableId> {
        self.objects.get(&obj).map(|o| o.stable)
    }

    fn is_concrete(&self, obj: ObjRef) -> bool {
        self.objects.get(&obj).is_some_and(|o| o.concrete)
    }

    fn decont(&self, obj: ObjRef) -> Option<Value> {
        self.objects.get(&obj).and_then(|o| o.content.clone())
    }

    fn is_rw_container(&self, obj: ObjRef) -> bool {
        self.objects.get(&obj).is_some_and(|o| o.rw)
    }
}
