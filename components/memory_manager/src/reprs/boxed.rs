//! Boxed primitives: `P6int`, `P6num`, `P6str`, `P6bigint`.

use super::mismatched;
use crate::object::ObjectBody;
use crate::repr::{BoxedPrimitive, Copyable, Repr, StorageSpec};
use crate::stable::STable;
use core_types::VmResult;
use num_bigint::BigInt;
use num_traits::Zero;
use std::sync::Arc;

/// Boxed native integer.
#[derive(Debug)]
pub struct P6Int;

impl Repr for P6Int {
    fn name(&self) -> &'static str {
        "P6int"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Int(0))
    }

    fn body_size(&self, _body: &ObjectBody) -> usize {
        8
    }

    fn storage_spec(&self, _st: &STable) -> StorageSpec {
        StorageSpec::boxed(BoxedPrimitive::Int)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Copyable for P6Int {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Int(i) => Ok(ObjectBody::Int(*i)),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

/// Boxed native float.
#[derive(Debug)]
pub struct P6Num;

impl Repr for P6Num {
    fn name(&self) -> &'static str {
        "P6num"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Num(0.0))
    }

    fn body_size(&self, _body: &ObjectBody) -> usize {
        8
    }

    fn storage_spec(&self, _st: &STable) -> StorageSpec {
        StorageSpec::boxed(BoxedPrimitive::Num)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Copyable for P6Num {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Num(n) => Ok(ObjectBody::Num(*n)),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

/// Boxed string.
#[derive(Debug)]
pub struct P6Str;

impl Repr for P6Str {
    fn name(&self) -> &'static str {
        "P6str"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::Str(Arc::from("")))
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        match body {
            ObjectBody::Str(s) => 16 + s.len(),
            _ => 16,
        }
    }

    fn storage_spec(&self, _st: &STable) -> StorageSpec {
        StorageSpec::boxed(BoxedPrimitive::Str)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Copyable for P6Str {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            // Strings are immutable, sharing is a copy
            ObjectBody::Str(s) => Ok(ObjectBody::Str(s.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

/// Arbitrary-precision integer.
#[derive(Debug)]
pub struct P6BigInt;

impl Repr for P6BigInt {
    fn name(&self) -> &'static str {
        "P6bigint"
    }

    fn allocate(&self, _st: &STable) -> VmResult<ObjectBody> {
        Ok(ObjectBody::BigInt(BigInt::zero()))
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        match body {
            ObjectBody::BigInt(b) => 16 + (b.bits() as usize).div_ceil(8),
            _ => 16,
        }
    }

    fn storage_spec(&self, _st: &STable) -> StorageSpec {
        StorageSpec::boxed(BoxedPrimitive::Int)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }
}

impl Copyable for P6BigInt {
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::BigInt(b) => Ok(ObjectBody::BigInt(b.clone())),
            other => Err(mismatched(self.name(), other)),
        }
    }
}
