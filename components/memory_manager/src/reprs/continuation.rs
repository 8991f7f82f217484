//! `MVMContinuation`: a detached chain of call stack regions.

use super::mismatched;
use crate::object::{ContinuationBody, ObjectBody};
use crate::repr::{Copyable, Markable, Repr};
use crate::stable::STable;
use crate::worklist::Worklist;
use bytecode_system::Reg;
use core_types::VmResult;
use std::sync::atomic::AtomicBool;

/// The `MVMContinuation` REPR.
#[derive(Debug)]
pub struct ContinuationRepr;

impl Repr for ContinuationRepr {
    fn name(&self) -> &'static str {
        "MVMContinuation"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Continuation(ContinuationBody {
            detached: None,
            result_reg: Reg(0),
            invoked: AtomicBool::new(false),
        }))
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        // The regions are accounted to the continuation that holds them
        match body {
            ObjectBody::Continuation(ContinuationBody {
                detached: Some(d), ..
            }) => 24 + d.records().map(|r| r.size()).sum::<usize>(),
            _ => 24,
        }
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Markable for ContinuationRepr {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Continuation(c) = body {
            if let Some(detached) = &c.detached {
                detached.visit_values(&mut |v| worklist.push_value(v));
            }
        }
    }
}

impl Copyable for ContinuationRepr {
    /// The copy is never invoked, whatever the state of the original.
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Continuation(c) => Ok(ObjectBody::Continuation(ContinuationBody {
                detached: c.detached.clone(),
                result_reg: c.result_reg,
                invoked: AtomicBool::new(false),
            })),
            other => Err(mismatched(self.name(), other)),
        }
    }
}
