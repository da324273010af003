//! Worklist-driven peephole fixpoint.
//!
//! Construction-time peepholes see the graph only as far as it has been
//! built. Once parsing is done, every live node is put on the worklist and
//! revisited until nothing changes:
//!
//! 1. Pop a node; kill it if nothing uses it any more
//! 2. Run one peephole step on it
//! 3. On progress, queue its users and the replacement, and subsume it
//! 4. Queue any distant neighbours that depended on it
//!
//! Types only move down the lattice, so the loop terminates. The fuel
//! limit exists to catch a rule pair that undoes each other.

use crate::ir::graph::Graph;
use crate::ir::node::Op;
use crate::types::Types;

/// What one fixpoint run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterStats {
    /// Nodes popped off the worklist.
    pub steps: usize,
    /// Steps that made progress.
    pub changes: usize,
    /// Unused nodes reclaimed.
    pub killed: usize,
}

/// Drain the worklist. Panics if more than `max_iterations` nodes are
/// popped, which means the rewrite rules do not converge.
pub fn iterate(graph: &mut Graph, types: &mut Types, max_iterations: usize) -> IterStats {
    let mut stats = IterStats::default();
    let seed: Vec<_> = graph.live_nodes().collect();
    for n in seed {
        graph.push_work(n);
    }
    // Sub-nodes built by rewrites are peepholed even when construction
    // peepholes were switched off.
    let was_on = graph.peephole_on();
    graph.set_peephole(true);

    while let Some(n) = graph.pop_work() {
        if graph.is_unused(n) {
            graph.kill(n);
            stats.killed += 1;
            continue;
        }
        stats.steps += 1;
        graph.stats.iter_steps += 1;
        assert!(
            stats.steps <= max_iterations,
            "peephole worklist did not converge after {max_iterations} steps"
        );

        if let Some(x) = graph.peephole_opt(types, n) {
            if graph.is_dead(x) {
                continue;
            }
            if !graph.ty(x).is_valid() {
                let t = graph.compute(types, x);
                graph.set_type(types, x, t);
            }
            if x != n || !matches!(graph.op(x), Op::Con(_)) {
                stats.changes += 1;
                graph.push_uses(n);
                graph.push_work(x);
                if x != n && !graph.is_dead(n) {
                    log::trace!("iter: {n} {} => {x} {}", graph.op(n).name(), graph.op(x).name());
                    graph.subsume(n, x);
                }
            }
        }
        if !graph.is_dead(n) {
            graph.move_deps_to_worklist(n);
        }
    }

    graph.set_peephole(was_on);
    debug_assert!(graph.verify_edges().is_ok(), "use-def edges out of sync");
    log::debug!(
        "iter_peeps: {} steps, {} changes, {} killed",
        stats.steps,
        stats.changes,
        stats.killed
    );
    stats
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::NodeId;
    use crate::testing::{entry, finish};
    use pretty_assertions::assert_eq;

    const FUEL: usize = 10_000;

    /// `return (arg + 1) + 2;` built without construction peepholes.
    fn lazy_chain(seed: Option<u64>) -> (Graph, Types) {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        g.set_peephole(false);
        g.set_worklist_seed(seed);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let one = t.int_con(1);
        let two = t.int_con(2);
        let c1 = g.con(&mut t, one);
        let c2 = g.con(&mut t, two);
        let a = g.new_node(&mut t, Op::Add, &[None, Some(arg), Some(c1)]);
        let b = g.new_node(&mut t, Op::Add, &[None, Some(a), Some(c2)]);
        finish(&mut g, &mut t, ctrl, mem, b);
        (g, t)
    }

    #[test]
    fn test_fixpoint_folds_lazy_graph() {
        let (mut g, mut t) = lazy_chain(None);
        assert_eq!(g.print(&t), "return ((arg+1)+2);");
        let stats = iterate(&mut g, &mut t, FUEL);
        assert!(stats.changes > 0);
        assert_eq!(g.print(&t), "return (arg+3);");
        assert_eq!(g.stats.monotone_violations, 0);
        assert!(!g.peephole_on());
    }

    #[test]
    fn test_seeded_orders_reach_same_fixpoint() {
        let expected = {
            let (mut g, mut t) = lazy_chain(None);
            iterate(&mut g, &mut t, FUEL);
            g.print(&t)
        };
        for seed in [1, 7, 42, 1234] {
            let (mut g, mut t) = lazy_chain(Some(seed));
            iterate(&mut g, &mut t, FUEL);
            assert_eq!(g.print(&t), expected, "seed {seed}");
        }
    }

    #[test]
    fn test_fixpoint_is_idempotent() {
        let (mut g, mut t) = lazy_chain(None);
        iterate(&mut g, &mut t, FUEL);
        let once = g.print(&t);
        let live = g.live_nodes().count();
        let again = iterate(&mut g, &mut t, FUEL);
        assert_eq!(again.changes, 0);
        assert_eq!(g.print(&t), once);
        assert_eq!(g.live_nodes().count(), live);
    }

    #[test]
    fn test_unused_nodes_are_reclaimed() {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let stray: NodeId = g.add(Op::Minus, &[None, Some(arg)]);
        finish(&mut g, &mut t, ctrl, mem, arg);
        let stats = iterate(&mut g, &mut t, FUEL);
        assert!(g.is_dead(stray));
        assert!(stats.killed >= 1);
        assert_eq!(g.print(&t), "return arg;");
    }

    #[test]
    #[should_panic(expected = "did not converge")]
    fn test_fuel_exhaustion_panics() {
        let (mut g, mut t) = lazy_chain(None);
        iterate(&mut g, &mut t, 1);
    }
}
