//! Candidate production
//!
//! Builds the graph of a routine, optimizes it under a plan's
//! assumptions, inlines known callees, emits and validates the result.

use crate::candidate::Candidate;
use crate::config::SpeshConfig;
use crate::graph::SpeshGraph;
use crate::inline::inline_sites;
use crate::optimize::Optimizer;
use crate::planner::Plan;
use crate::routine::{Routine, SpeshHost};
use crate::stats::{FrameKey, SpeshStats};
use bytecode_system::{FrameBody, Opcode};
use core_types::{ErrorKind, VmError, VmResult};

/// Produces a validated candidate for `plan`.
pub fn specialize(
    host: &dyn SpeshHost,
    routine: &Routine,
    plan: &Plan,
    stats: &SpeshStats,
    config: &SpeshConfig,
) -> VmResult<Candidate> {
    let body = routine.body();
    let mut graph = SpeshGraph::from_body(body)?;

    let tuple = plan.types.as_ref().and_then(|types| {
        stats.tuple(&FrameKey {
            routine: plan.routine,
            callsite: plan.callsite,
            types: types.clone(),
        })
    });
    let sites = Optimizer::new(host, routine, plan.types.as_deref(), tuple).run(&mut graph)?;
    let inlines = if config.inline_enabled {
        inline_sites(&mut graph, sites, host, routine.id(), config.max_inline_size)?
    } else {
        Vec::new()
    };

    let instructions = graph.emit();
    let specialized = FrameBody {
        name: body.name.clone(),
        instructions,
        num_registers: graph.num_registers,
        num_lexicals: body.num_lexicals,
        num_params: body.num_params,
        num_cache_slots: body.num_cache_slots,
        outer: body.outer,
    };
    specialized.validate()?;
    check_tables(&specialized, &graph, body.len())?;

    log::debug!(
        "specialized '{}' for {:?}: {} -> {} instructions, {} deopt point(s), {} inline(s)",
        body.name,
        plan.kind,
        body.len(),
        specialized.len(),
        graph.deopts.len(),
        inlines.len()
    );
    Ok(Candidate::new(
        plan.callsite,
        plan.types.clone(),
        specialized.instructions.into(),
        graph.deopts.into(),
        graph.slots.into(),
        inlines,
        specialized.num_registers,
    ))
}

fn check_tables(body: &FrameBody, graph: &SpeshGraph, original_len: usize) -> VmResult<()> {
    let fail = |at: usize, what: &str| {
        Err(VmError::adhoc(
            ErrorKind::Bytecode,
            format!("{} at specialized instruction {} of '{}'", what, at, body.name),
        ))
    };
    if graph.deopts.iter().any(|&offset| offset as usize >= original_len) {
        return fail(0, "deopt offset out of range");
    }
    for (at, inst) in body.instructions.iter().enumerate() {
        match inst.opcode {
            Opcode::SpGuardType { deopt, .. }
            | Opcode::SpGuardLiteralInt { deopt, .. }
            | Opcode::SpGuardLiteralObj { deopt, .. }
                if deopt as usize >= graph.deopts.len() =>
            {
                return fail(at, "deopt index out of range");
            }
            _ => {}
        }
        match inst.opcode {
            Opcode::SpGetSlot { slot, .. } | Opcode::SpGuardLiteralObj { slot, .. }
                if slot as usize >= graph.slots.len() =>
            {
                return fail(at, "spesh slot out of range");
            }
            _ => {}
        }
    }
    Ok(())
}
