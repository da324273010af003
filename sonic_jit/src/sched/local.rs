//! List scheduling inside each block.
//!
//! Each block starts with its head control node and ends with its tail.
//! In between, a node becomes ready once all of its same-block inputs are
//! placed; among ready nodes the highest score goes first and ties go to
//! the lower node id. Phis read their inputs at block entry, so they never
//! wait on anything in their own block.

use super::cfg::{BlockId, Cfg};
use super::gcm::Placement;
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId, Op};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;

/// Priority of a ready node; higher runs first.
fn score(graph: &Graph, n: NodeId) -> u32 {
    match graph.op(n) {
        Op::Proj { .. } | Op::CProj { .. } => 1001,
        Op::Phi { .. } | Op::Parm { .. } => 1000,
        _ => 500,
    }
}

/// Fill every block's `nodes` with its placed nodes in execution order.
pub fn local_schedule(graph: &Graph, cfg: &mut Cfg, placement: &Placement) {
    let mut members: FxHashMap<BlockId, Vec<NodeId>> = FxHashMap::default();
    for &n in placement.nodes() {
        if let Some(b) = placement.block(n) {
            members.entry(b).or_default().push(n);
        }
    }

    // Load -> Stores it must precede.
    let mut before: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
    for &n in placement.nodes() {
        for &ld in placement.anti_deps(n) {
            before.entry(ld).or_default().push(n);
        }
    }

    for i in 0..cfg.len() {
        let b = BlockId::new(i as u32);
        let (head, tail) = {
            let bb = cfg.block(b);
            (bb.head, bb.tail)
        };
        let nodes = members.remove(&b).unwrap_or_default();
        let order = schedule_block(graph, head, tail, &nodes, &before);
        cfg.block_mut(b).nodes = order;
    }
    log::debug!("local_sched: {} blocks ordered", cfg.len());
}

fn schedule_block(
    graph: &Graph,
    head: NodeId,
    tail: Option<NodeId>,
    nodes: &[NodeId],
    before: &FxHashMap<NodeId, Vec<NodeId>>,
) -> Vec<NodeId> {
    let mut inside = BitSet::new();
    for &n in nodes {
        if n != head && Some(n) != tail {
            inside.insert(n.as_usize());
        }
    }

    // Ready counts: distinct same-block inputs still unscheduled.
    let mut count: SecondaryMap<Node, u32> = SecondaryMap::new();
    for &n in nodes {
        if !inside.contains(n.as_usize()) || graph.op(n).is_phi() {
            continue;
        }
        let mut ins: Vec<NodeId> = graph
            .node(n)
            .inputs
            .iter()
            .flatten()
            .copied()
            .filter(|d| inside.contains(d.as_usize()))
            .collect();
        ins.sort_unstable();
        ins.dedup();
        *count.entry(n) += ins.len() as u32;
    }
    for &n in nodes {
        if !inside.contains(n.as_usize()) {
            continue;
        }
        for &st in before.get(&n).map_or(&[][..], Vec::as_slice) {
            if inside.contains(st.as_usize()) {
                *count.entry(st) += 1;
            }
        }
    }

    let mut ready: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|&n| inside.contains(n.as_usize()) && count[n] == 0)
        .collect();
    let mut order = Vec::with_capacity(nodes.len() + 2);
    order.push(head);
    let mut done = BitSet::new();

    loop {
        let Some(i) = (0..ready.len()).max_by_key(|&i| (score(graph, ready[i]), Reverse(ready[i])))
        else {
            break;
        };
        let pick = ready.swap_remove(i);
        order.push(pick);
        done.insert(pick.as_usize());

        let mut users: Vec<NodeId> = graph
            .uses(pick)
            .iter()
            .copied()
            .filter(|u| inside.contains(u.as_usize()) && !graph.op(*u).is_phi())
            .collect();
        users.sort_unstable();
        users.dedup();
        if let Some(stores) = before.get(&pick) {
            users.extend(stores.iter().copied().filter(|s| inside.contains(s.as_usize())));
        }
        for u in users {
            let c = count.entry(u);
            *c = c.saturating_sub(1);
            if *c == 0 && !done.contains(u.as_usize()) && !ready.contains(&u) {
                ready.push(u);
            }
        }
    }

    // A cycle would leave nodes behind; keep them rather than drop them.
    for &n in nodes {
        if inside.contains(n.as_usize()) && !done.contains(n.as_usize()) {
            log::warn!("local_sched: {n} {} never became ready", graph.op(n).name());
            order.push(n);
        }
    }
    if let Some(t) = tail {
        order.push(t);
    }
    order
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::cfg::DominatorTree;
    use crate::sched::gcm::global_code_motion;
    use crate::sched::loops::LoopTree;
    use crate::testing::{entry, finish};
    use crate::types::Types;
    use std::rc::Rc;

    fn position(order: &[NodeId], n: NodeId) -> usize {
        order.iter().position(|&x| x == n).unwrap()
    }

    #[test]
    fn test_inputs_come_first_and_tail_last() {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let two = t.int_con(2);
        let c2 = g.con(&mut t, two);
        let mul = g.new_node(&mut t, Op::Mul, &[None, Some(arg), Some(c2)]);
        let neg = g.new_node(&mut t, Op::Minus, &[None, Some(mul)]);
        let ret = finish(&mut g, &mut t, ctrl, mem, neg);

        let mut cfg = Cfg::build(&g);
        let dom = DominatorTree::build(&cfg);
        LoopTree::compute(&mut cfg, &dom);
        let p = global_code_motion(&g, &cfg, &dom);
        local_schedule(&g, &mut cfg, &p);

        let b = cfg.block_of_cfg(ctrl).unwrap();
        let order = &cfg.block(b).nodes;
        assert_eq!(order[0], ctrl);
        assert_eq!(*order.last().unwrap(), ret);
        assert!(position(order, mul) < position(order, neg));

        let start = cfg.block(cfg.entry);
        assert_eq!(start.nodes[0], g.start);
        // Start's projections come right after it.
        assert_eq!(start.nodes[1], mem);
        assert_eq!(start.nodes[2], arg);
    }

    #[test]
    fn test_anti_dependence_orders_load_before_store() {
        let mut t = Types::new();
        let s = t.declare_struct("S");
        let int = t.int_bot;
        let alias = t.add_field(s, "f", int, false);
        let s = t.close_struct(s).unwrap_or(s);
        let ptr = t.ptr(2, s);
        let mut g = Graph::new(&mut t, ptr);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let one = t.one;
        let c1 = g.con(&mut t, one);
        // Built store-first so node ids alone would order it wrong.
        let st = g.new_node(
            &mut t,
            Op::Store {
                name: Rc::from("f"),
                alias,
            },
            &[None, Some(mem), Some(arg), Some(c1)],
        );
        g.keep(st);
        let ld = g.new_node(
            &mut t,
            Op::Load {
                name: Rc::from("f"),
                alias,
                decl: int,
            },
            &[None, Some(mem), Some(arg)],
        );
        finish(&mut g, &mut t, ctrl, st, ld);
        g.unkeep(st);

        let mut cfg = Cfg::build(&g);
        let dom = DominatorTree::build(&cfg);
        LoopTree::compute(&mut cfg, &dom);
        let p = global_code_motion(&g, &cfg, &dom);
        local_schedule(&g, &mut cfg, &p);
        let b = p.block(st).unwrap();
        let order = &cfg.block(b).nodes;
        assert!(position(order, ld) < position(order, st));
    }
}
