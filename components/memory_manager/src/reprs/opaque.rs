//! `P6opaque`: objects with named attribute slots.

use super::mismatched;
use crate::object::{ObjectBody, OpaqueBody};
use crate::repr::{ComposeInfo, Composable, Copyable, Markable, Repr, ReprData};
use crate::stable::STable;
use crate::worklist::Worklist;
use core_types::{ErrorKind, Value, VmError, VmResult};

/// The `P6opaque` REPR.
#[derive(Debug)]
pub struct P6Opaque;

impl Repr for P6Opaque {
    fn name(&self) -> &'static str {
        "P6opaque"
    }

    fn allocate(&self, st: &STable) -> VmResult<ObjectBody> {
        match st.repr_data() {
            Some(ReprData::Opaque { attributes }) => Ok(ObjectBody::Opaque(OpaqueBody {
                attrs: vec![Value::Null; attributes.len()],
            })),
            _ => Err(VmError::adhoc(
                ErrorKind::Compose,
                format!("P6opaque type '{}' must be composed before allocation", st.name()),
            )),
        }
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        match body {
            ObjectBody::Opaque(o) => 8 + 8 * o.attrs.len(),
            _ => 8,
        }
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }

    fn composable(&self) -> Option<&dyn Composable> {
        Some(self)
    }
}

impl Markable for P6Opaque {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Opaque(o) = body {
            o.attrs.iter().for_each(|v| worklist.push_value(v));
        }
    }
}

impl Copyable for P6Opaque {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Opaque(o) => Ok(ObjectBody::Opaque(o.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

impl Composable for P6Opaque {
    fn compose(&self, st: &STable, info: &ComposeInfo) -> VmResult<ReprData> {
        for (i, name) in info.attributes.iter().enumerate() {
            if info.attributes[..i].contains(name) {
                return Err(VmError::adhoc(
                    ErrorKind::Compose,
                    format!("Duplicate attribute '{}' in type '{}'", name, st.name()),
                ));
            }
        }
        Ok(ReprData::Opaque {
            attributes: info.attributes.clone(),
        })
    }
}

impl OpaqueBody {
    /// Value of attribute `slot`.
    pub fn get(&self, slot: usize) -> VmResult<Value> {
        self.attrs.get(slot).cloned().ok_or_else(|| Self::no_slot(slot))
    }

    /// Stores into attribute `slot`.
    pub fn bind(&mut self, slot: usize, value: Value) -> VmResult<()> {
        let cell = self.attrs.get_mut(slot).ok_or_else(|| Self::no_slot(slot))?;
        *cell = value;
        Ok(())
    }

    fn no_slot(slot: usize) -> VmError {
        VmError::adhoc(ErrorKind::Bounds, format!("No attribute in slot {}", slot))
    }
}
