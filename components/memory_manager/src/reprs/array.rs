//! `VMArray`: growable array whose element kind is fixed at compose time.

use super::mismatched;
use crate::object::{ArrayBody, ArraySlotType, ObjectBody};
use crate::repr::{ComposeInfo, Composable, Copyable, Markable, Repr, ReprData};
use crate::stable::STable;
use crate::worklist::Worklist;
use core_types::{ErrorKind, Value, VmError, VmResult};

/// The `VMArray` REPR.
#[derive(Debug)]
pub struct VmArray;

impl Repr for VmArray {
    fn name(&self) -> &'static str {
        "VMArray"
    }

    fn allocate(&self, st: &STable) -> VmResult<ObjectBody> {
        match st.repr_data() {
            Some(ReprData::Array(slot_type)) => Ok(ObjectBody::Array(ArrayBody {
                slot_type: *slot_type,
                elems: Vec::new(),
            })),
            _ => Err(VmError::adhoc(
                ErrorKind::Compose,
                format!("VMArray type '{}' must be composed before allocation", st.name()),
            )),
        }
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        match body {
            ObjectBody::Array(a) => 16 + 8 * a.elems.len(),
            _ => 16,
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

impl Markable for VmArray {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Array(a) = body {
            if a.slot_type == ArraySlotType::Obj {
                a.elems.iter().for_each(|v| worklist.push_value(v));
            }
        }
    }
}

impl Copyable for VmArray {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Array(a) => Ok(ObjectBody::Array(a.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

impl Composable for VmArray {
    fn compose(&self, _st: &STable, info: &ComposeInfo) -> VmResult<ReprData> {
        Ok(ReprData::Array(info.array_type.unwrap_or(ArraySlotType::Obj)))
    }
}

impl ArrayBody {
    /// Element at `index`; negative indexes count from the end. Reading past
    /// the end yields the empty value of the element kind.
    pub fn at_pos(&self, index: i64) -> Value {
        match self.resolve(index) {
            Some(i) if i < self.elems.len() => self.elems[i].clone(),
            _ => self.slot_type.empty_value(),
        }
    }

    /// Stores `value` at `index`, extending the array as needed.
    pub fn bind_pos(&mut self, index: i64, value: Value) -> VmResult<()> {
        self.check(&value)?;
        let i = self.resolve(index).ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::Bounds,
                format!("Index {} out of range (elems {})", index, self.elems.len()),
            )
        })?;
        if i >= self.elems.len() {
            self.elems.resize(i + 1, self.slot_type.empty_value());
        }
        self.elems[i] = value;
        Ok(())
    }

    /// Appends `value`.
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        self.check(&value)?;
        self.elems.push(value);
        Ok(())
    }

    fn resolve(&self, index: i64) -> Option<usize> {
        if index >= 0 {
            Some(index as usize)
        } else {
            let from_end = self.elems.len() as i64 + index;
            (from_end >= 0).then_some(from_end as usize)
        }
    }

    fn check(&self, value: &Value) -> VmResult<()> {
        if self.slot_type.accepts(value) {
            Ok(())
        } else {
            Err(VmError::type_check(format!(
                "Cannot store a {:?} in a {:?} array",
                value.kind(),
                self.slot_type
            )))
        }
    }
}
