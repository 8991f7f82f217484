//! Argument guard trees
//!
//! A routine's candidates are selected at frame entry by walking a flat
//! array of guard nodes from node 0. Every node tests one thing and moves
//! to `yes` or `no`; a `RESULT` node names the candidate. A target of 0
//! means no candidate applies, since nothing ever jumps back to the root.
//!
//! Trees are never edited. Installing or removing a candidate regenerates
//! the whole tree from the candidate list.

use crate::spesh_log::{ArgType, ObservedType};
use bytecode_system::CallsiteId;
use core_types::{ErrorKind, ObjectInspector, StableId, Value, VmError, VmResult};

/// Test performed by a guard node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOp {
    /// The call used exactly this shape
    Callsite(CallsiteId),
    /// Make argument `n` the value under test; always succeeds
    LoadArg(u16),
    /// Value is a concrete instance of the STable
    StableConc(StableId),
    /// Value is the type object of the STable
    StableType(StableId),
    /// Value is a container; its content becomes the value under test
    DerefValue,
    /// Value is an rw container; the value under test is unchanged
    DerefRw,
    /// Select the candidate
    Result(u32),
}

/// One node of a guard tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardNode {
    /// The test
    pub op: GuardOp,
    /// Next node if the test passes
    pub yes: u32,
    /// Next node if it fails
    pub no: u32,
}

/// What a candidate needs from a call to be selected.
#[derive(Debug, Clone, Copy)]
pub struct GuardSpec<'a> {
    /// Shape the candidate was built for
    pub callsite: CallsiteId,
    /// Argument types, or `None` for a certain candidate
    pub types: Option<&'a [Option<ArgType>]>,
}

/// Upper bound on the nodes one candidate adds to a tree.
pub fn max_new_nodes(types: Option<&[Option<ArgType>]>) -> usize {
    let per_arg: usize = types
        .unwrap_or(&[])
        .iter()
        .flatten()
        .map(|t| 2 + usize::from(t.rw) + if t.decont.is_some() { 2 } else { 0 })
        .sum();
    2 + per_arg + 1
}

fn type_op(ty: ObservedType) -> GuardOp {
    if ty.concrete {
        GuardOp::StableConc(ty.stable)
    } else {
        GuardOp::StableType(ty.stable)
    }
}

/// A flat guard tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardTree {
    nodes: Vec<GuardNode>,
}

impl GuardTree {
    /// A tree that never selects anything.
    pub fn empty() -> Self {
        GuardTree::default()
    }

    /// The nodes, root first.
    pub fn nodes(&self) -> &[GuardNode] {
        &self.nodes
    }

    /// Builds a tree over `specs`; `specs[i]` selects candidate `i`.
    /// Typed candidates are tried before the certain one of their shape.
    pub fn build(specs: &[GuardSpec<'_>]) -> VmResult<GuardTree> {
        let mut shapes: Vec<CallsiteId> = Vec::new();
        for spec in specs {
            if !shapes.contains(&spec.callsite) {
                shapes.push(spec.callsite);
            }
        }

        let budget: usize = specs.iter().map(|s| max_new_nodes(s.types)).sum();
        let mut nodes: Vec<GuardNode> = Vec::with_capacity(budget);
        let mut last_shape_node: Option<usize> = None;

        for shape in shapes {
            let mut order: Vec<usize> = (0..specs.len())
                .filter(|&i| specs[i].callsite == shape && specs[i].types.is_some())
                .collect();
            if let Some(certain) = (0..specs.len()).find(|&i| specs[i].callsite == shape && specs[i].types.is_none()) {
                order.push(certain);
            }

            let shape_node = nodes.len();
            if let Some(prev) = last_shape_node {
                nodes[prev].no = shape_node as u32;
            }
            last_shape_node = Some(shape_node);
            nodes.push(GuardNode {
                op: GuardOp::Callsite(shape),
                yes: shape_node as u32 + 1,
                no: 0,
            });

            // Failure edges of each chain point at the start of the next one
            let mut pending_fail: Vec<usize> = Vec::new();
            for index in order {
                let start = nodes.len() as u32;
                for at in pending_fail.drain(..) {
                    nodes[at].no = start;
                }
                let limit = nodes.len() + max_new_nodes(specs[index].types);
                Self::emit_chain(&mut nodes, specs[index], index as u32, &mut pending_fail);
                if nodes.len() > limit || nodes.len() > budget {
                    return Err(VmError::adhoc(
                        ErrorKind::GuardTree,
                        format!("guard tree for candidate {} exceeds its node budget", index),
                    ));
                }
            }
        }

        let tree = GuardTree { nodes };
        tree.check()?;
        Ok(tree)
    }

    fn emit_chain(nodes: &mut Vec<GuardNode>, spec: GuardSpec<'_>, candidate: u32, fails: &mut Vec<usize>) {
        let mut push = |nodes: &mut Vec<GuardNode>, op: GuardOp, can_fail: bool| {
            let at = nodes.len();
            nodes.push(GuardNode {
                op,
                yes: at as u32 + 1,
                no: 0,
            });
            if can_fail {
                fails.push(at);
            }
        };
        for (i, arg) in spec.types.unwrap_or(&[]).iter().enumerate() {
            let Some(arg) = arg else { continue };
            push(nodes, GuardOp::LoadArg(i as u16), false);
            push(nodes, type_op(arg.ty), true);
            if arg.rw {
                push(nodes, GuardOp::DerefRw, true);
            }
            if let Some(inner) = arg.decont {
                push(nodes, GuardOp::DerefValue, true);
                push(nodes, type_op(inner), true);
            }
        }
        nodes.push(GuardNode {
            op: GuardOp::Result(candidate),
            yes: 0,
            no: 0,
        });
    }

    fn check(&self) -> VmResult<()> {
        let len = self.nodes.len() as u32;
        for (i, node) in self.nodes.iter().enumerate() {
            let i = i as u32;
            let forward = |t: u32| t == 0 || (t > i && t < len);
            let ok = match node.op {
                GuardOp::Result(_) => true,
                _ => forward(node.yes) && node.yes != 0 && forward(node.no),
            };
            if !ok {
                return Err(VmError::adhoc(
                    ErrorKind::GuardTree,
                    format!("guard node {} has a target out of order", i),
                ));
            }
        }
        Ok(())
    }

    /// Selects a candidate for a call.
    pub fn run(&self, callsite: CallsiteId, args: &[Value], inspector: &dyn ObjectInspector) -> Option<u32> {
        let mut at = 0usize;
        let mut test = Value::Null;
        loop {
            let node = self.nodes.get(at)?;
            let pass = match node.op {
                GuardOp::Callsite(cs) => cs == callsite,
                GuardOp::LoadArg(i) => {
                    test = args.get(i as usize).cloned().unwrap_or_default();
                    true
                }
                GuardOp::StableConc(st) => match test {
                    Value::Obj(o) => inspector.is_concrete(o) && inspector.stable_of(o) == Some(st),
                    _ => false,
                },
                GuardOp::StableType(st) => match test {
                    Value::Obj(o) => !inspector.is_concrete(o) && inspector.stable_of(o) == Some(st),
                    _ => false,
                },
                GuardOp::DerefValue => match test.as_obj().and_then(|o| inspector.decont(o)) {
                    Some(inner) => {
                        test = inner;
                        true
                    }
                    None => false,
                },
                GuardOp::DerefRw => test.as_obj().is_some_and(|o| inspector.is_rw_container(o)),
                GuardOp::Result(candidate) => return Some(candidate),
            };
            let next = if pass { node.yes } else { node.no };
            if next == 0 {
                return None;
            }
            at = next as usize;
        }
    }

    /// Selects a candidate for a type tuple rather than live arguments.
    pub fn run_types(&self, callsite: CallsiteId, types: Option<&[Option<ArgType>]>) -> Option<u32> {
        #[derive(Clone, Copy)]
        enum Test {
            Nothing,
            Arg(ArgType),
            Inner(ObservedType),
        }
        let matches = |test: Test, stable: StableId, concrete: bool| match test {
            Test::Arg(a) => a.ty.stable == stable && a.ty.concrete == concrete,
            Test::Inner(t) => t.stable == stable && t.concrete == concrete,
            Test::Nothing => false,
        };
        let mut at = 0usize;
        let mut test = Test::Nothing;
        loop {
            let node = self.nodes.get(at)?;
            let pass = match node.op {
                GuardOp::Callsite(cs) => cs == callsite,
                GuardOp::LoadArg(i) => {
                    test = types
                        .and_then(|t| t.get(i as usize).copied().flatten())
                        .map_or(Test::Nothing, Test::Arg);
                    true
                }
                GuardOp::StableConc(st) => matches(test, st, true),
                GuardOp::StableType(st) => matches(test, st, false),
                GuardOp::DerefValue => match test {
                    Test::Arg(ArgType { decont: Some(inner), .. }) => {
                        test = Test::Inner(inner);
                        true
                    }
                    _ => false,
                },
                GuardOp::DerefRw => matches!(test, Test::Arg(ArgType { rw: true, .. })),
                GuardOp::Result(candidate) => return Some(candidate),
            };
            let next = if pass { node.yes } else { node.no };
            if next == 0 {
                return None;
            }
            at = next as usize;
        }
    }
}
