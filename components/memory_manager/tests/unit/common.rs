//! Shared fixtures

use memory_manager::{ArraySlotType, ComposeInfo, ReprRegistry, STable, STableRegistry};
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Types {
    pub reprs: ReprRegistry,
    pub stables: STableRegistry,
}

impl Types {
    pub fn new() -> Self {
        init_logging();
        Types {
            reprs: ReprRegistry::with_builtins(),
            stables: STableRegistry::new(),
        }
    }

    pub fn plain(&self, name: &str, repr: &str) -> Arc<STable> {
        self.stables.create(name, self.reprs.lookup(repr).unwrap())
    }

    pub fn composed(&self, name: &str, repr: &str, info: ComposeInfo) -> Arc<STable> {
        let st = self.plain(name, repr);
        st.compose(&info).unwrap();
        st
    }

    pub fn obj_array(&self) -> Arc<STable> {
        self.composed(
            "Array",
            "VMArray",
            ComposeInfo {
                array_type: Some(ArraySlotType::Obj),
                ..Default::default()
            },
        )
    }
}
