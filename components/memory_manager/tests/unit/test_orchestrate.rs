//! Stop-the-world rounds across real threads

use super::common::Types;
use core_types::{ObjRef, Value};
use memory_manager::{CollectionKind, GcStatus, Heap, HeapConfig, Orchestrator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_running_threads_vote_and_keep_roots() {
    let t = Types::new();
    let int = t.plain("Int", "P6int");
    let orch = Arc::new(Orchestrator::new());
    let heap = Arc::new(Heap::new(HeapConfig::default().with_verify_heap(true)));
    let done = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(Barrier::new(4));

    let coordinator = orch.register();
    let mut workers = Vec::new();
    for i in 0..3 {
        let (orch, heap, done, ready, int) = (orch.clone(), heap.clone(), done.clone(), ready.clone(), int.clone());
        workers.push(thread::spawn(move || {
            let me = orch.register();
            let mine = heap.box_value(me.id(), &int, Value::Int(i)).unwrap();
            ready.wait();
            let mut voted = 0;
            while !done.load(Ordering::Acquire) {
                if orch.safepoint(&me, &mut || vec![mine]) {
                    voted += 1;
                }
                thread::yield_now();
            }
            orch.unregister(&me);
            (mine, voted)
        }));
    }
    ready.wait();

    let mut interrupted = 0;
    let ran = orch.run_round(&coordinator, &mut || Vec::new(), &mut |round| {
        interrupted = round.interrupted.len();
        assert!(round.stolen.is_empty());
        let roots: Vec<ObjRef> = round.roots();
        assert_eq!(roots.len(), 3);
        heap.collect(CollectionKind::Minor, &roots);
    });
    assert!(ran);
    assert_eq!(interrupted, 3);
    done.store(true, Ordering::Release);

    for (i, worker) in workers.into_iter().enumerate() {
        let (obj, voted) = worker.join().unwrap();
        assert_eq!(voted, 1);
        assert_eq!(heap.unbox_int(obj).unwrap(), i as i64);
    }
    assert_eq!(orch.rounds_completed(), 1);
    assert_eq!(orch.thread_count(), 1);
}

#[test]
fn test_blocked_thread_waits_for_stolen_round() {
    let t = Types::new();
    let int = t.plain("Int", "P6int");
    let orch = Arc::new(Orchestrator::new());
    let heap = Arc::new(Heap::new(HeapConfig::default()));
    let coordinator = orch.register();
    let (blocked_tx, blocked_rx) = crossbeam::channel::bounded::<ObjRef>(1);
    let (resume_tx, resume_rx) = crossbeam::channel::bounded::<()>(1);

    let worker = {
        let (orch, heap, int) = (orch.clone(), heap.clone(), int.clone());
        thread::spawn(move || {
            let me = orch.register();
            let mine = heap.box_value(me.id(), &int, Value::Int(5)).unwrap();
            let guard = orch.block(&me, vec![mine]);
            blocked_tx.send(mine).unwrap();
            resume_rx.recv().unwrap();
            drop(guard);
            let status = me.status();
            orch.unregister(&me);
            status
        })
    };

    let mine = blocked_rx.recv().unwrap();
    let mut stolen = 0;
    orch.run_round(&coordinator, &mut || Vec::new(), &mut |round| {
        stolen = round.stolen.len();
        heap.collect(CollectionKind::Minor, &round.roots());
    });
    assert_eq!(stolen, 1);
    resume_tx.send(()).unwrap();
    assert_eq!(worker.join().unwrap(), GcStatus::None);
    assert_eq!(heap.unbox_int(mine).unwrap(), 5);
}

#[test]
fn test_parked_thread_is_collected_for_and_unparks() {
    let t = Types::new();
    let int = t.plain("Int", "P6int");
    let orch = Arc::new(Orchestrator::new());
    let heap = Arc::new(Heap::new(HeapConfig::default()));
    let coordinator = orch.register();
    let idle = orch.register();
    let mine = heap.box_value(idle.id(), &int, Value::Int(9)).unwrap();
    orch.park(&idle, vec![mine]);
    assert_eq!(idle.status(), GcStatus::Unable);

    let mut stolen = Vec::new();
    let ran = orch.run_round(&coordinator, &mut || Vec::new(), &mut |round| {
        stolen = round.stolen.clone();
        heap.collect(CollectionKind::Full, &round.roots());
    });
    assert!(ran);
    assert_eq!(stolen, vec![idle.id()]);
    assert_eq!(idle.status(), GcStatus::Unable);
    assert_eq!(heap.unbox_int(mine).unwrap(), 9);

    // Parking again only refreshes the published roots
    orch.park(&idle, Vec::new());
    orch.unpark(&idle);
    assert_eq!(idle.status(), GcStatus::None);
    orch.unregister(&idle);
}
