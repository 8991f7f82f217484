//! Deoptimization
//!
//! A failing guard moves its frame from the specialized instructions back
//! to the original ones. Specialized code only ever adds registers, so the
//! register file carries over untouched; the deopt table says where in the
//! original instructions to resume.

use bytecode_system::Instruction;
use callstack::FrameState;
use core_types::{ErrorKind, VmError, VmResult};
use std::sync::Arc;

/// Why a frame left specialized code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeoptReason {
    /// A type or concreteness guard failed
    TypeGuardFailure,
    /// A literal guard failed
    LiteralGuardFailure,
}

/// A completed deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptInfo {
    /// Why it happened
    pub reason: DeoptReason,
    /// Candidate the frame was running
    pub candidate: u32,
    /// Original offset execution resumes at
    pub resume_offset: u32,
}

/// Switches `state` to `original`, resuming at the offset deopt point
/// `deopt` maps to.
pub fn deoptimize(
    state: &mut FrameState,
    original: &Arc<[Instruction]>,
    deopt: u32,
    reason: DeoptReason,
) -> VmResult<DeoptInfo> {
    let Some(spesh) = state.spesh.as_ref() else {
        return Err(VmError::adhoc(
            ErrorKind::Bytecode,
            "guard failed in a frame that is not running specialized code",
        ));
    };
    let resume_offset = match spesh.deopts.get(deopt as usize) {
        Some(&offset) if (offset as usize) < original.len() => offset,
        _ => {
            return Err(VmError::adhoc(
                ErrorKind::Bytecode,
                format!("deopt index {} has no valid resume offset", deopt),
            ))
        }
    };
    let candidate = spesh.candidate;
    state.spesh = None;
    state.bytecode = original.clone();
    state.pc = resume_offset;
    log::debug!(
        "deopt of {:?} candidate {} ({:?}), resuming at {}",
        state.static_frame,
        candidate,
        reason,
        resume_offset
    );
    Ok(DeoptInfo {
        reason,
        candidate,
        resume_offset,
    })
}
