//! Post-convergence type checks.
//!
//! While the graph is being built a node's type may still be provisional,
//! so checks that depend on the final lattice position run here, after the
//! worklist has drained. The first error in node order is reported.

use crate::error::{CompileError, Result};
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::{NodeId, Op};
use crate::types::Types;

/// Check every node reachable from Stop.
pub fn type_check(graph: &Graph, types: &mut Types) -> Result<()> {
    let mut reachable = reachable_from_stop(graph);
    reachable.sort_unstable();
    for n in reachable {
        if let Some(msg) = check_node(graph, types, n) {
            log::debug!("type_check: {n} {}: {msg}", graph.op(n).name());
            return Err(CompileError::TypeCheck(msg));
        }
    }
    Ok(())
}

/// Live nodes that feed Stop.
pub(crate) fn reachable_from_stop(graph: &Graph) -> Vec<NodeId> {
    let mut seen = BitSet::with_capacity(graph.len());
    let mut stack = vec![graph.stop];
    let mut out = Vec::new();
    while let Some(n) = stack.pop() {
        if graph.is_dead(n) || !seen.insert(n.as_usize()) {
            continue;
        }
        out.push(n);
        stack.extend(graph.node(n).inputs.iter().flatten().copied());
    }
    out
}

fn check_node(graph: &Graph, types: &mut Types, n: NodeId) -> Option<String> {
    match graph.op(n) {
        Op::Load { name, .. } | Op::Store { name, .. } => {
            let ptr = graph.input(n, 2)?;
            let pt = graph.ty(ptr);
            if types.may_be_nil(pt) {
                return Some(format!("Might be null accessing '{name}'"));
            }
            None
        }
        Op::Call => {
            let nins = graph.nins(n);
            let fptr = graph.input(n, nins - 1)?;
            let ft = graph.ty(fptr);
            if types.is_high(ft) {
                return None;
            }
            if !types.is_fun_ptr(ft) {
                return Some("Cannot call a non-function".to_string());
            }
            if types.may_be_nil(ft) {
                return Some("Might be null calling a function".to_string());
            }
            let decl: Vec<_> = types.fun_args(ft).map(<[_]>::to_vec).unwrap_or_default();
            for (i, &want) in decl.iter().enumerate() {
                let Some(a) = graph.input(n, 2 + i) else {
                    continue;
                };
                let at = graph.ty(a);
                if !types.isa(at, want) {
                    return Some(format!(
                        "Argument {} is {}, expected {}",
                        i + 1,
                        types.show(at),
                        types.show(want)
                    ));
                }
            }
            None
        }
        op if op.is_int_binop() || matches!(op, Op::Minus) => {
            non_number(graph, types, n, |types, t| types.is_int(t))
        }
        op if op.is_float_binop() || matches!(op, Op::MinusF) => {
            non_number(graph, types, n, |types, t| types.is_float(t))
        }
        _ => None,
    }
}

/// An arithmetic operand that converged to something other than a number.
fn non_number(
    graph: &Graph,
    types: &Types,
    n: NodeId,
    is_num: impl Fn(&Types, crate::types::TypeId) -> bool,
) -> Option<String> {
    for i in 1..graph.nins(n) {
        let Some(x) = graph.input(n, i) else { continue };
        let t = graph.ty(x);
        if !types.is_high(t) && !is_num(types, t) {
            return Some(format!("Not a number: {}", types.show(t)));
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, finish};
    use std::rc::Rc;

    /// `struct C { int f; }` with `arg` typed as a pointer to it.
    fn with_ptr_arg(nil: u8) -> (Graph, Types, NodeId, NodeId, NodeId, u32) {
        let mut t = Types::new();
        let c = t.declare_struct("C");
        let int = t.int_bot;
        let alias = t.add_field(c, "f", int, false);
        let c = t.close_struct(c).unwrap_or(c);
        let ptr = t.ptr(nil, c);
        let mut g = Graph::new(&mut t, ptr);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        (g, t, ctrl, mem, arg, alias)
    }

    fn load_f(g: &mut Graph, t: &mut Types, mem: NodeId, ptr: NodeId, alias: u32) -> NodeId {
        let decl = t.int_bot;
        g.new_node(
            t,
            Op::Load {
                name: Rc::from("f"),
                alias,
                decl,
            },
            &[None, Some(mem), Some(ptr)],
        )
    }

    #[test]
    fn test_nullable_load_is_reported() {
        let (mut g, mut t, ctrl, mem, arg, alias) = with_ptr_arg(3);
        let ld = load_f(&mut g, &mut t, mem, arg, alias);
        finish(&mut g, &mut t, ctrl, mem, ld);
        let err = type_check(&g, &mut t).unwrap_err();
        assert_eq!(err, CompileError::TypeCheck("Might be null accessing 'f'".into()));
    }

    #[test]
    fn test_non_null_load_passes() {
        let (mut g, mut t, ctrl, mem, arg, alias) = with_ptr_arg(2);
        let ld = load_f(&mut g, &mut t, mem, arg, alias);
        finish(&mut g, &mut t, ctrl, mem, ld);
        assert!(type_check(&g, &mut t).is_ok());
    }

    #[test]
    fn test_arithmetic_on_pointer_is_reported() {
        let (mut g, mut t, ctrl, mem, arg, _) = with_ptr_arg(2);
        let neg = g.new_node(&mut t, Op::Minus, &[None, Some(arg)]);
        finish(&mut g, &mut t, ctrl, mem, neg);
        let err = type_check(&g, &mut t).unwrap_err();
        assert!(err.to_string().starts_with("Not a number"), "{err}");
    }

    #[test]
    fn test_call_of_integer_is_reported() {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let call = g.new_node(&mut t, Op::Call, &[Some(ctrl), Some(mem), Some(arg)]);
        finish(&mut g, &mut t, call, mem, arg);
        let err = type_check(&g, &mut t).unwrap_err();
        assert_eq!(err.to_string(), "Cannot call a non-function");
    }

    #[test]
    fn test_unreachable_nodes_are_ignored() {
        let (mut g, mut t, ctrl, mem, arg, alias) = with_ptr_arg(3);
        let ld = load_f(&mut g, &mut t, mem, arg, alias);
        g.keep(ld);
        finish(&mut g, &mut t, ctrl, mem, arg);
        assert!(type_check(&g, &mut t).is_ok());
    }
}
