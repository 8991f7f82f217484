//! Collection through the public heap API

use super::common::Types;
use core_types::{ObjRef, ThreadId, Value};
use memory_manager::{CollectionKind, Heap, HeapConfig};

const T0: ThreadId = ThreadId(0);
const T1: ThreadId = ThreadId(1);

fn verifying_heap(nursery: usize) -> Heap {
    Heap::new(HeapConfig::default().with_nursery_size(nursery).with_verify_heap(true))
}

/// Builds `n` arrays, each holding the previous one; returns the last.
fn chain(heap: &Heap, types: &Types, n: usize) -> ObjRef {
    let array = types.obj_array();
    let mut prev = Value::Null;
    let mut last = None;
    for _ in 0..n {
        let arr = heap.allocate(T0, &array).unwrap();
        heap.array_push(T0, arr, prev).unwrap();
        prev = Value::Obj(arr);
        last = Some(arr);
    }
    last.unwrap()
}

fn chain_len(heap: &Heap, head: ObjRef) -> usize {
    let mut len = 0;
    let mut at = Value::Obj(head);
    while let Value::Obj(arr) = at {
        len += 1;
        at = heap.array_at(arr, 0).unwrap();
    }
    len
}

#[test]
fn test_long_chain_survives_minor_collections() {
    let t = Types::new();
    let heap = verifying_heap(16 * 1024 * 1024);
    let head = chain(&heap, &t, 10_000);

    let first = heap.collect(CollectionKind::Minor, &[head]);
    assert_eq!(first.survivors, 10_000);
    assert_eq!(first.freed, 0);
    assert_eq!(chain_len(&heap, head), 10_000);

    let second = heap.collect(CollectionKind::Minor, &[head]);
    assert_eq!(second.promoted, 10_000);
    assert!(heap.is_gen2(head));
    assert_eq!(chain_len(&heap, head), 10_000);
    assert!(heap.verify().is_ok());
}

#[test]
fn test_dropping_head_frees_chain_on_full_collection() {
    let t = Types::new();
    let heap = verifying_heap(1024 * 1024);
    let head = chain(&heap, &t, 100);
    heap.collect(CollectionKind::Minor, &[head]);
    heap.collect(CollectionKind::Minor, &[head]);
    assert_eq!(heap.gen2().live_objects(), 100);

    let report = heap.collect(CollectionKind::Full, &[]);
    assert_eq!(report.gen2_freed, 100);
    assert_eq!(heap.gen2().live_objects(), 0);
    assert!(!heap.is_alive(head));
}

#[test]
fn test_young_objects_of_other_threads_kept_by_gen2_owner() {
    let t = Types::new();
    let heap = verifying_heap(1024 * 1024);
    let int = t.plain("Int", "P6int");
    let array = t.obj_array();

    let holder = heap.allocate(T0, &array).unwrap();
    heap.collect(CollectionKind::Minor, &[holder]);
    heap.collect(CollectionKind::Minor, &[holder]);

    // T1 allocates and stores into T0's gen2 array
    let young = heap.box_value(T1, &int, Value::Int(77)).unwrap();
    heap.array_push(T1, holder, Value::Obj(young)).unwrap();
    assert_eq!(heap.remembered_len(T1), 1);

    heap.collect(CollectionKind::Minor, &[holder]);
    assert_eq!(heap.unbox_int(young).unwrap(), 77);
    heap.collect(CollectionKind::Minor, &[holder]);
    assert!(heap.is_gen2(young));
    // Nothing young left to remember
    assert_eq!(heap.remembered_len(T0) + heap.remembered_len(T1), 0);
}

#[test]
fn test_full_collection_threshold() {
    let t = Types::new();
    let heap = Heap::new(
        HeapConfig::default()
            .with_nursery_size(1024 * 1024)
            .with_full_collection_threshold(1024),
    );
    let head = chain(&heap, &t, 100);
    heap.collect(CollectionKind::Minor, &[head]);
    assert!(!heap.wants_full_collection());
    heap.collect(CollectionKind::Minor, &[head]);
    assert!(heap.stats().bytes_promoted >= 1024);
    assert!(heap.wants_full_collection());
    heap.collect(CollectionKind::Full, &[head]);
    assert!(!heap.wants_full_collection());
    assert_eq!(heap.stats().full_collections, 1);
}

#[test]
fn test_permanent_roots_survive() {
    let t = Types::new();
    let heap = verifying_heap(64 * 1024);
    let int = t.plain("Int", "P6int");
    let kept = heap.box_value(T0, &int, Value::Int(9)).unwrap();
    heap.add_permanent_root(kept);
    heap.collect(CollectionKind::Full, &[]);
    heap.collect(CollectionKind::Full, &[]);
    assert_eq!(heap.unbox_int(kept).unwrap(), 9);
    assert!(heap.is_gen2(kept));
}
