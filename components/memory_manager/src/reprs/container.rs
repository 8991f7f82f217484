//! `Scalar`: a single-value container.

use super::mismatched;
use crate::object::{ContainerBody, ObjectBody};
use crate::repr::{Copyable, Markable, Repr};
use crate::stable::STable;
use crate::worklist::Worklist;
use core_types::{Value, VmResult};

/// The `Scalar` REPR. New containers are rw and hold null.
#[derive(Debug)]
pub struct ScalarRepr;

impl Repr for ScalarRepr {
    fn name(&self) -> &'static str {
        "Scalar"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Container(ContainerBody {
            value: Value::Null,
            rw: true,
        }))
    }

    fn body_size(&self, _body: &ObjectBody) -> usize {
        16
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Markable for ScalarRepr {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Container(c) = body {
            worklist.push_value(&c.value);
        }
    }
}

impl Copyable for ScalarRepr {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Container(c) => Ok(ObjectBody::Container(c.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}
