//! Lexical access and closure capture
//!
//! A frame's lexicals live inline in its call stack record until something
//! captures the frame; from then on they live in a heap frame object and the
//! record only points at it. Outer chains always run through heap frames.

use crate::thread::ThreadContext;
use callstack::{Record, RecordRef};
use core_types::{vm_panic, ErrorKind, ObjRef, Value, VmError, VmResult, PANIC_ALLOC, PANIC_STACK};
use memory_manager::Heap;
use std::sync::Arc;

fn no_outer(outers: u16) -> VmError {
    VmError::adhoc(
        ErrorKind::Bytecode,
        format!("No outer frame {} levels out", outers),
    )
}

fn no_lexical(index: u16) -> VmError {
    VmError::adhoc(ErrorKind::Bounds, format!("No lexical in slot {}", index))
}

impl ThreadContext {
    fn outer_of(&self, heap: &Heap, at: RecordRef) -> VmResult<Option<ObjRef>> {
        match self.stack.get(at) {
            Some(Record::Frame { env, .. }) => Ok(env.outer),
            Some(record) => match record.heap_frame() {
                Some(frame) => Ok(heap.frame_env(frame)?.outer),
                None => vm_panic(PANIC_STACK, "lexical lookup from a record that is not a frame"),
            },
            None => vm_panic(PANIC_STACK, "lexical lookup from a record that is not on the stack"),
        }
    }

    /// The heap frame holding lexicals `outers` levels out, or `None` for
    /// the frame's own inline lexicals.
    fn lexical_home(&self, heap: &Heap, at: RecordRef, outers: u16) -> VmResult<Option<ObjRef>> {
        if outers == 0 {
            return Ok(self.stack.get(at).and_then(Record::heap_frame));
        }
        let mut frame = self.outer_of(heap, at)?.ok_or_else(|| no_outer(outers))?;
        for _ in 1..outers {
            frame = heap.frame_env(frame)?.outer.ok_or_else(|| no_outer(outers))?;
        }
        Ok(Some(frame))
    }

    pub(crate) fn get_lex(&self, at: RecordRef, outers: u16, index: u16) -> VmResult<Value> {
        let heap = &self.shared.heap;
        if let Some(frame) = self.lexical_home(heap, at, outers)? {
            return heap.frame_lexical(frame, index as usize);
        }
        match self.stack.get(at) {
            Some(Record::Frame { env, .. }) => env.lexicals.get(index as usize).cloned().ok_or_else(|| no_lexical(index)),
            _ => vm_panic(PANIC_STACK, "inline lexicals of a record that is not a frame"),
        }
    }

    pub(crate) fn bind_lex(&mut self, at: RecordRef, outers: u16, index: u16, value: Value) -> VmResult<()> {
        let shared = Arc::clone(&self.shared);
        let tc = self.id();
        let heap = &shared.heap;
        if let Some(frame) = self.lexical_home(heap, at, outers)? {
            return heap.bind_frame_lexical(tc, frame, index as usize, value);
        }
        match self.stack.get_mut(at) {
            Some(Record::Frame { env, .. }) => {
                let slot = env.lexicals.get_mut(index as usize).ok_or_else(|| no_lexical(index))?;
                *slot = value;
                Ok(())
            }
            _ => vm_panic(PANIC_STACK, "inline lexicals of a record that is not a frame"),
        }
    }

    /// Clones `code` with the frame at `at` as its outer, moving that frame
    /// to the heap first.
    pub(crate) fn take_closure(&mut self, at: RecordRef, code: ObjRef) -> VmResult<ObjRef> {
        let shared = Arc::clone(&self.shared);
        let tc = self.id();
        let heap = &shared.heap;
        let frame_type = &shared.types.frame;
        let frame = self.stack.promote_to_heap(at, &mut |env| match heap.new_frame(tc, frame_type, env) {
            Ok(frame) => frame,
            Err(e) => vm_panic(PANIC_ALLOC, &format!("could not allocate a heap frame: {}", e)),
        });
        let closure = heap.clone_object(tc, code)?;
        heap.set_code_outer(tc, closure, frame)?;
        self.check_nursery(heap.wants_collection(tc));
        Ok(closure)
    }
}
