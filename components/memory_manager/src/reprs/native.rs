//! `CStruct`, `CArray` and `CPointer`: native memory for interop.
//!
//! The calling convention itself lives outside the VM; these REPRs only own
//! the memory and the library handle the memory came from.

use super::mismatched;
use crate::object::{ExternalHandle, NativeBody, NativeKind, ObjectBody};
use crate::repr::{
    ComposeInfo, Composable, Copyable, Freeable, Initializable, Markable, Repr, ReprData,
    StorageSpec,
};
use crate::stable::STable;
use crate::worklist::Worklist;
use core_types::{ErrorKind, VmError, VmResult};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// One of the three interop REPRs.
#[derive(Debug)]
pub struct NativeRepr {
    kind: NativeKind,
}

impl NativeRepr {
    /// Creates the REPR for `kind`.
    pub fn new(kind: NativeKind) -> Self {
        NativeRepr { kind }
    }
}

impl Repr for NativeRepr {
    fn name(&self) -> &'static str {
        match self.kind {
            NativeKind::Struct => "CStruct",
            NativeKind::Array => "CArray",
            NativeKind::Pointer => "CPointer",
        }
    }

    fn allocate(&self, st: &STable) -> VmResult<ObjectBody> {
        let size = match (self.kind, st.repr_data()) {
            (NativeKind::Pointer, _) => std::mem::size_of::<usize>(),
            (_, Some(ReprData::Native { size, .. })) => *size,
            _ => {
                return Err(VmError::adhoc(
                    ErrorKind::Compose,
                    format!("{} type '{}' must be composed before allocation", self.name(), st.name()),
                ))
            }
        };
        Ok(ObjectBody::Native(NativeBody {
            kind: self.kind,
            buffer: vec![0; size],
            library: None,
            children: Vec::new(),
        }))
    }

    fn body_size(&self, body: &ObjectBody) -> usize {
        match body {
            ObjectBody::Native(n) => 32 + n.buffer.len() + 8 * n.children.len(),
            _ => 32,
        }
    }

    fn storage_spec(&self, _st: &STable) -> StorageSpec {
        match self.kind {
            NativeKind::Pointer => StorageSpec {
                inlineable: true,
                bits: (std::mem::size_of::<usize>() * 8) as u16,
                boxed_primitive: None,
            },
            _ => StorageSpec::REFERENCE,
        }
    }

    fn initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }

    fn markable(&self) -> Option<&dyn Markable> {
        Some(self)
    }

    fn copyable(&self) -> Option<&dyn Copyable> {
        Some(self)
    }

    fn freeable(&self) -> Option<&dyn Freeable> {
        Some(self)
    }

    fn composable(&self) -> Option<&dyn Composable> {
        match self.kind {
            NativeKind::Pointer => None,
            _ => Some(self),
        }
    }
}

impl Initializable for NativeRepr {
    /// Opens the library the type is bound to.
    fn initialize(&self, st: &STable, body: &mut ObjectBody) -> VmResult<()> {
        let ObjectBody::Native(native) = body else {
            return Err(mismatched(self.name(), body));
        };
        if let Some(ReprData::Native {
            library: Some((name, counter)),
            ..
        }) = st.repr_data()
        {
            if native.library.is_none() {
                native.library = Some(ExternalHandle::open(name.clone(), counter.clone()));
            }
        }
        Ok(())
    }
}

impl Markable for NativeRepr {
    fn mark(&self, body: &ObjectBody, worklist: &mut Worklist) {
        if let ObjectBody::Native(n) = body {
            n.children.iter().for_each(|v| worklist.push_value(v));
        }
    }
}

impl Copyable for NativeRepr {
    /// Copies the memory and opens the library again rather than sharing
    /// the handle.
    fn copy(&self, _st: &STable, src: &ObjectBody) -> VmResult<ObjectBody> {
        match src {
            ObjectBody::Native(n) => Ok(ObjectBody::Native(NativeBody {
                kind: n.kind,
                buffer: n.buffer.clone(),
                library: n.library.as_ref().map(ExternalHandle::reopen),
                children: n.children.clone(),
            })),
            other => Err(mismatched(self.name(), other)),
        }
    }
}

impl Freeable for NativeRepr {
    fn free(&self, body: &mut ObjectBody) {
        if let ObjectBody::Native(n) = body {
            if let Some(lib) = n.library.as_mut() {
                lib.close();
            }
            n.buffer = Vec::new();
        }
    }
}

impl Composable for NativeRepr {
    fn compose(&self, st: &STable, info: &ComposeInfo) -> VmResult<ReprData> {
        let size = info.native_size.ok_or_else(|| {
            VmError::adhoc(
                ErrorKind::Compose,
                format!("{} type '{}' needs a native size", self.name(), st.name()),
            )
        })?;
        Ok(ReprData::Native {
            kind: self.kind,
            size,
            library: info
                .library
                .clone()
                .map(|name| (name, Arc::new(AtomicUsize::new(0)))),
        })
    }
}
