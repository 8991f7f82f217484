//! The worker thread fed through a thread's spesh log.

use crate::common::FakeVm;
use bytecode_system::{ArgFlag, FrameBody, Opcode, Reg};
use core_types::{StableId, StaticFrameId, ThreadId, Value};
use specializer::{ArgType, LogEntry, SpeshConfig, SpeshHost, SpeshLog, SpeshWorker};
use std::sync::Arc;

fn identity() -> FrameBody {
    let mut body = FrameBody::new("identity").with_registers(1).with_params(1);
    body.emit(Opcode::Param { dest: Reg(0), index: 0 });
    body.emit(Opcode::Return { src: Reg(0) });
    body
}

#[test]
fn test_blocking_flush_installs_candidate() {
    let vm = Arc::new(FakeVm::new());
    let routine = vm.add_routine(1, identity());
    let shape = vm.callsites.intern(&[ArgFlag::Obj]);
    let typed = vm.add_object(10, 4, true);
    let other = vm.add_object(11, 5, true);

    let config = SpeshConfig::default().with_nodelay(true).with_blocking(true);
    let host: Arc<dyn SpeshHost> = vm.clone();
    let mut worker = SpeshWorker::spawn(host, config).unwrap();
    let mut log = SpeshLog::new(ThreadId(0), 64, true, worker.sender());
    let correlation = log.next_correlation();
    log.record(LogEntry::Entry {
        correlation,
        routine: StaticFrameId(1),
        callsite: shape,
        types: vec![Some(ArgType::plain(StableId(4), true))].into_boxed_slice(),
        depth: 1,
    });
    assert!(routine.spesh().is_empty());
    log.flush();
    assert_eq!(log.pending(), 0);

    let selected = routine.spesh().select(shape, &[Value::Obj(typed)], &*vm).unwrap();
    assert_eq!(selected.types.as_ref().map(|t| t.len()), Some(1));
    assert!(routine.spesh().select(shape, &[Value::Obj(other)], &*vm).is_none());

    // Already covered, so a second batch installs nothing new
    let correlation = log.next_correlation();
    log.record(LogEntry::Entry {
        correlation,
        routine: StaticFrameId(1),
        callsite: shape,
        types: vec![Some(ArgType::plain(StableId(4), true))].into_boxed_slice(),
        depth: 1,
    });
    log.flush();
    assert_eq!(routine.spesh().len(), 1);

    drop(log);
    worker.shutdown();
}

#[test]
fn test_log_outliving_worker_drops_entries() {
    let vm = Arc::new(FakeVm::new());
    vm.add_routine(1, identity());
    let shape = vm.callsites.intern(&[ArgFlag::Obj]);
    let mut worker = SpeshWorker::spawn(vm.clone(), SpeshConfig::default()).unwrap();
    let mut log = SpeshLog::new(ThreadId(3), 64, true, worker.sender());
    worker.shutdown();
    log.record(LogEntry::Entry {
        correlation: 1,
        routine: StaticFrameId(1),
        callsite: shape,
        types: vec![None].into_boxed_slice(),
        depth: 0,
    });
    // Neither blocks nor panics once the worker is gone
    log.flush();
    assert_eq!(log.pending(), 0);
}
