//! Delimited continuations
//!
//! `reset` opens a region whose first record is the tag; `control` slices
//! every region from that tag up into a continuation object; invoking the
//! continuation splices them back on top of the invoker. A continuation
//! runs at most once.

use crate::thread::ThreadContext;
use bytecode_system::Reg;
use callstack::ReturnTarget;
use core_types::{vm_panic, ErrorKind, ObjRef, Value, VmError, VmResult, PANIC_ALLOC, PANIC_STACK};
use std::sync::Arc;

impl ThreadContext {
    /// Pushes a boundary tagged `tag` and invokes `code` above it. The
    /// result of `code`, or of a handler that captured up to the boundary,
    /// lands in `dest`.
    pub(crate) fn reset(&mut self, dest: Reg, tag: Value, code: ObjRef) -> VmResult<()> {
        self.stack.push_continuation_tag(tag, dest);
        if let Err(e) = self.invoke(code, Vec::new(), None, ReturnTarget::Register(dest)) {
            // Nothing ran above the boundary
            self.stack.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Captures up to the newest boundary tagged `tag` and invokes `code`
    /// with the continuation in its place.
    pub(crate) fn control(&mut self, dest: Reg, protect: bool, tag: Value, code: ObjRef) -> VmResult<()> {
        let detached = self.stack.slice(&tag, protect)?;
        let result_reg = match detached.tag_result_reg() {
            Some(reg) => reg,
            None => vm_panic(PANIC_STACK, "sliced continuation does not start at its tag"),
        };
        log::debug!(
            "captured continuation of {} frame(s) on thread {}",
            detached.frame_count(),
            self.id().0
        );
        let shared = Arc::clone(&self.shared);
        let tc = self.id();
        let heap = &shared.heap;
        let cont = heap.new_continuation(tc, &shared.types.continuation, detached, dest)?;
        self.check_nursery(heap.wants_collection(tc));
        self.invoke(code, vec![Value::Obj(cont)], None, ReturnTarget::Register(result_reg))
    }

    /// Puts the frames of `cont` back on the stack, delivering `value` as
    /// the result of the `control` that captured them. Whatever the
    /// continuation's outermost frame returns lands in `dest`.
    pub(crate) fn resume(&mut self, dest: Reg, cont: ObjRef, value: Value) -> VmResult<()> {
        let shared = Arc::clone(&self.shared);
        let tc = self.id();
        let heap = &shared.heap;
        let (mut detached, result_reg) = heap.take_continuation(cont, |detached, result_reg| {
            if detached.root_frame().is_none() {
                return Err(VmError::adhoc(
                    ErrorKind::Continuation,
                    "Continuation holds no frames",
                ));
            }
            match detached.top_frame() {
                Some(top) if top.work.len() <= result_reg.index() => Err(VmError::adhoc(
                    ErrorKind::Bytecode,
                    format!("No register r{} for the continuation result", result_reg.index()),
                )),
                _ => Ok(()),
            }
        })?;

        if detached.has_heap_frames() {
            // Resumed frames may reach outers through frames below them
            let frame_type = &shared.types.frame;
            self.stack.promote_all(&mut |env| match heap.new_frame(tc, frame_type, env) {
                Ok(frame) => frame,
                Err(e) => vm_panic(PANIC_ALLOC, &format!("could not allocate a heap frame: {}", e)),
            });
        }

        if let Some(root) = detached.root_frame_mut() {
            root.return_to = ReturnTarget::Register(dest);
        }
        if let Some(slot) = detached
            .top_frame_mut()
            .and_then(|top| top.work.get_mut(result_reg.index()))
        {
            *slot = value;
        }
        self.stack.splice(detached);
        Ok(())
    }
}
