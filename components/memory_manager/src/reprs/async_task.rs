//! `MVMAsyncTask`: work handed to the event loop.

use crate::object::{AsyncTaskBody, ObjectBody};
use crate::repr::{Freeable, Markable, Repr};
use crate::stable::STable;
use crate::worklist::Worklist;
use core_types::VmResult;

/// The `MVMAsyncTask` REPR. Tasks own an OS handle and cannot be copied.
#[derive(Debug)]
pub struct AsyncTaskRepr;

impl Repr for AsyncTaskRepr {
    fn name(&self) -> &'static str {
        "MVMAsyncTask"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::AsyncTask(AsyncTaskBody {
            queue: None,
            schedulee: None,
            handle: None,
            cancelled: false,
        }))
    }

    fn body_size(&self, _body: &ObjectBody) -> usize {
        32
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn freeable(&self) -> Option<&dyn Freeable> {
        Some(self)
    }
}

impl Markable for AsyncTaskRepr {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::AsyncTask(t) = body {
            worklist.push_opt(t.queue);
            worklist.push_opt(t.schedulee);
        }
    }
}

impl Freeable for AsyncTaskRepr {
    fn free(&self, body: &mut ObjectBody) {
        if let ObjectBody::AsyncTask(t) = body {
            if let Some(handle) = t.handle.as_mut() {
                handle.close();
            }
        }
    }
}
