//! `MVMCode` and `MVMFrame`.

use super::mismatched;
use crate::object::{CodeBody, ObjectBody};
use crate::repr::{Copyable, Markable, Repr};
use crate::stable::STable;
use crate::worklist::Worklist;
use callstack::FrameEnv;
use core_types::{StaticFrameId, VmResult};
use std::sync::Arc;

/// The `MVMCode` REPR: a routine plus its captured outer.
#[derive(Debug)]
pub struct CodeRepr;

impl Repr for CodeRepr {
    fn name(&self) -> &'static str {
        "MVMCode"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Code(CodeBody {
            static_frame: StaticFrameId(0),
            name: Arc::from(""),
            outer: None,
        }))
    }

    fn body_size(&self, _body: &ObjectBody) -> usize {
        24
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Markable for CodeRepr {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Code(c) = body {
            worklist.push_opt(c.outer);
        }
    }
}

impl Copyable for CodeRepr {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Code(c) => Ok(ObjectBody::Code(c.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

/// The `MVMFrame` REPR: a frame environment that outlives the call stack.
#[derive(Debug)]
pub struct FrameRepr;

impl Repr for FrameRepr {
    fn name(&self) -> &'static str {
        "MVMFrame"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Frame(FrameEnv {
            static_frame: StaticFrameId(0),
            lexicals: Vec::new(),
            outer: None,
        }))
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        match body {
            ObjectBody::Frame(env) => 16 + 16 * env.lexicals.len(),
            _ => 16,
        }
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Markable for FrameRepr {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Frame(env) = body {
            env.visit_values(&mut |v| worklist.push_value(v));
        }
    }
}

impl Copyable for FrameRepr {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Frame(env) => Ok(ObjectBody::Frame(env.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}
