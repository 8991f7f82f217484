//! Specialization planning
//!
//! Turns the stats of hot routines into plans. A type tuple seen often
//! enough at a callsite shape earns a plan guarded on those types; calls
//! not covered by any such tuple may still earn a certain plan that
//! assumes nothing about argument types.

use crate::config::SpeshConfig;
use crate::spesh_log::TypeTuple;
use crate::routine::SpeshHost;
use crate::stats::SpeshStats;
use crate::threshold::threshold;
use bytecode_system::CallsiteId;
use core_types::StaticFrameId;

/// Kind of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Guarded on an observed type tuple
    ObservedTypes,
    /// No argument type guards
    Certain,
}

/// A specialization to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Routine to specialize
    pub routine: StaticFrameId,
    /// Shape to specialize for
    pub callsite: CallsiteId,
    /// What the candidate will assume
    pub kind: PlanKind,
    /// The tuple, for `ObservedTypes`
    pub types: Option<TypeTuple>,
    /// Hits behind the plan
    pub hits: u64,
    /// Deepest call depth seen
    pub max_depth: u32,
}

/// Plans for every hot routine, deepest first.
pub fn plan(stats: &SpeshStats, host: &dyn SpeshHost, config: &SpeshConfig) -> Vec<Plan> {
    let mut plans = Vec::new();
    for (&id, routine_stats) in stats.routines() {
        let Some(routine) = host.routine(id) else { continue };
        let needed = threshold(routine.body().len(), config.nodelay);
        if routine_stats.hits < needed {
            continue;
        }
        let spesh = routine.spesh();
        for cs in &routine_stats.by_callsite {
            let mut accounted = 0u64;
            let mut deepest = 0u32;
            for tuple in &cs.tuples {
                deepest = deepest.max(tuple.max_depth);
                if tuple.hits * 100 < cs.hits * u64::from(config.plan_percentage) {
                    continue;
                }
                // A tuple with no object arguments guards nothing
                if tuple.types.iter().all(Option::is_none) {
                    continue;
                }
                accounted += tuple.hits;
                if spesh.covers(cs.callsite, Some(&tuple.types)) {
                    continue;
                }
                plans.push(Plan {
                    routine: id,
                    callsite: cs.callsite,
                    kind: PlanKind::ObservedTypes,
                    types: Some(tuple.types.clone()),
                    hits: tuple.hits,
                    max_depth: tuple.max_depth,
                });
            }
            let unaccounted = cs.hits - accounted;
            if unaccounted >= needed && !spesh.covers(cs.callsite, None) {
                plans.push(Plan {
                    routine: id,
                    callsite: cs.callsite,
                    kind: PlanKind::Certain,
                    types: None,
                    hits: unaccounted,
                    max_depth: deepest,
                });
            }
        }
    }
    plans.sort_by(|a, b| b.max_depth.cmp(&a.max_depth));
    if !plans.is_empty() {
        log::debug!("spesh planned {} specialization(s)", plans.len());
    }
    plans
}
