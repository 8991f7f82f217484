//! GC roots and collection rounds
//!
//! A thread's roots are every object its call stack and host pins refer
//! to. Instance-wide roots (inline cache programs, spesh slots) are added by
//! whichever thread coordinates the round. Static code objects and type
//! objects are permanent roots of the heap itself.

use crate::thread::{GcSummary, ThreadContext};
use callstack::CallStack;
use core_types::{ObjRef, Value};
use memory_manager::CollectionKind;
use std::sync::Arc;

/// Every object a thread holds.
pub(crate) fn thread_roots(stack: &CallStack, host_roots: &[Value]) -> Vec<ObjRef> {
    let mut roots = Vec::new();
    let mut add = |v: &Value| {
        if let Value::Obj(obj) = v {
            roots.push(*obj);
        }
    };
    stack.visit_values(&mut add);
    host_roots.iter().for_each(&mut add);
    roots
}

impl ThreadContext {
    /// Runs a round. If another thread is already coordinating one, this
    /// thread takes part in that round instead.
    pub(crate) fn collect(&mut self, kind: CollectionKind) {
        self.gc_wanted = None;
        let shared = Arc::clone(&self.shared);
        let stack = &self.stack;
        let host_roots = &self.host_roots;
        let mut summary = None;
        shared.orchestrator.run_round(
            &self.slot,
            &mut || thread_roots(stack, host_roots),
            &mut |round| {
                let mut roots = round.roots();
                roots.extend(shared.global_roots());
                let heap = &shared.heap;
                let kind = if kind == CollectionKind::Full || heap.wants_full_collection() {
                    CollectionKind::Full
                } else {
                    CollectionKind::Minor
                };
                let report = heap.collect(kind, &roots);
                summary = Some(GcSummary {
                    coordinator: round.coordinator,
                    interrupted: round.interrupted.clone(),
                    stolen: round.stolen.clone(),
                    report,
                });
            },
        );
        self.last_gc = summary;
    }

    /// Notes that the last allocation pushed this thread's nursery past its
    /// limit; the round runs at the next instruction boundary.
    pub(crate) fn check_nursery(&mut self, over_limit: bool) {
        if over_limit && self.gc_wanted.is_none() {
            log::trace!("thread {} wants a collection", self.id().0);
            self.gc_wanted = Some(CollectionKind::Minor);
        }
    }
}
