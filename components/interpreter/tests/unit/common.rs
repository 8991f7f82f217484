//! Shared fixtures

use bytecode_system::FrameBody;
use core_types::{Value, VmResult};
use interpreter::{VmConfig, VmInstance};
use specializer::SpeshConfig;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An instance without the specializer, so runs are deterministic.
pub fn vm() -> VmInstance {
    vm_with(VmConfig::default().with_spesh(SpeshConfig::default().with_enabled(false)))
}

pub fn vm_with(config: VmConfig) -> VmInstance {
    init_logging();
    VmInstance::new(config).unwrap()
}

/// Loads `body` and calls it once on a fresh thread.
pub fn run(vm: &VmInstance, body: FrameBody, args: &[Value]) -> VmResult<Value> {
    let id = vm.add_routine(body)?;
    vm.attach()?.call_routine(id, args)
}
