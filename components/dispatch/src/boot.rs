//! Dispatchers every instance starts with.

use crate::recorder::Recorder;
use crate::registry::{Dispatcher, DispatcherRegistry};
use core_types::VmResult;
use std::sync::Arc;

/// Result is the first argument, guarded to be exactly that value.
pub const BOOT_CONSTANT: &str = "boot-constant";
/// Result is the first argument, whatever it is.
pub const BOOT_VALUE: &str = "boot-value";
/// Invokes the code object in the first argument, guarded by identity.
pub const BOOT_CODE_CONSTANT: &str = "boot-code-constant";
/// Invokes the code object in the first argument, guarded by type only.
pub const BOOT_CODE: &str = "boot-code";

fn boot_constant(rec: &mut Recorder<'_>) -> VmResult<()> {
    let value = rec.track_arg(0)?;
    rec.guard_literal(value)?;
    let constant = rec.value(value).clone();
    rec.result_constant(constant)
}

fn boot_value(rec: &mut Recorder<'_>) -> VmResult<()> {
    let value = rec.track_arg(0)?;
    rec.result_value(value)
}

fn boot_code_constant(rec: &mut Recorder<'_>) -> VmResult<()> {
    let code = rec.track_arg(0)?;
    rec.guard_literal(code)?;
    rec.drop_arg(0)?;
    rec.result_code_invocation(code)
}

fn boot_code(rec: &mut Recorder<'_>) -> VmResult<()> {
    let code = rec.track_arg(0)?;
    rec.guard_type(code)?;
    rec.guard_concreteness(code)?;
    rec.drop_arg(0)?;
    rec.result_code_invocation(code)
}

/// Registers the boot dispatchers.
pub fn register_boot_dispatchers(registry: &DispatcherRegistry) -> VmResult<()> {
    registry.register(Dispatcher::new(BOOT_CONSTANT, Arc::new(boot_constant)))?;
    registry.register(Dispatcher::new(BOOT_VALUE, Arc::new(boot_value)))?;
    registry.register(Dispatcher::new(BOOT_CODE_CONSTANT, Arc::new(boot_code_constant)))?;
    registry.register(Dispatcher::new(BOOT_CODE, Arc::new(boot_code)))?;
    log::debug!("registered {} boot dispatchers", 4);
    Ok(())
}
