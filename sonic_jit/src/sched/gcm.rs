//! Global code motion: give every floating node a home block.
//!
//! # Algorithm
//!
//! 1. **Early**: the deepest block (in the dominator tree) among the
//!    blocks of a node's inputs; control inputs count directly
//! 2. **Late**: the common dominator of every use, visiting nodes only
//!    once all their uses are placed
//! 3. **Anti-dependences**: a Load is raised so it runs before any Store
//!    that overwrites the memory it reads
//! 4. **Choice**: walk from late up to early and keep the shallowest loop
//!    depth, ties going to the latest block
//!
//! Control nodes, Phis, Parms and projections of control are pinned and
//! never move. Projections of a New stay with their New.

use super::cfg::{BasicBlock, BlockId, Cfg, DominatorTree};
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId, Op};
use crate::opt::type_check::reachable_from_stop;
use rustc_hash::FxHashMap;

// =============================================================================
// Placement
// =============================================================================

/// Block assignment for every node reachable from Stop.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    block_of: SecondaryMap<Node, BlockId>,
    early: SecondaryMap<Node, BlockId>,
    /// Store -> Loads that must run before it when they share a block.
    anti_deps: FxHashMap<NodeId, Vec<NodeId>>,
    nodes: Vec<NodeId>,
}

impl Placement {
    /// Home block of `n`, if it was scheduled.
    pub fn block(&self, n: NodeId) -> Option<BlockId> {
        let b = self.block_of[n];
        b.is_valid().then_some(b)
    }

    /// Earliest legal block of a floating node.
    pub fn early(&self, n: NodeId) -> Option<BlockId> {
        let b = self.early[n];
        b.is_valid().then_some(b)
    }

    /// Loads that must be scheduled before `store` within a block.
    pub fn anti_deps(&self, store: NodeId) -> &[NodeId] {
        self.anti_deps.get(&store).map_or(&[], Vec::as_slice)
    }

    /// Every scheduled node, in id order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

/// Block a pinned node must live in; `None` for floating nodes.
fn pinned_block(graph: &Graph, cfg: &Cfg, n: NodeId) -> Option<BlockId> {
    let op = graph.op(n);
    if op.is_cfg() {
        return cfg.block_of_cfg(n);
    }
    match op {
        Op::Phi { .. } | Op::Parm { .. } => cfg.block_of_cfg(graph.input(n, 0)?),
        Op::Proj { .. } => {
            let src = graph.input(n, 0)?;
            if graph.is_cfg(src) {
                cfg.block_of_cfg(src)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_new_proj(graph: &Graph, n: NodeId) -> bool {
    matches!(graph.op(n), Op::Proj { .. })
        && graph
            .input(n, 0)
            .is_some_and(|src| matches!(graph.op(src), Op::New(_)))
}

/// Block in which `u` consumes `n`. A Phi consumes each input at the end
/// of the matching region predecessor.
fn use_block(
    graph: &Graph,
    cfg: &Cfg,
    dom: &DominatorTree,
    block_of: &SecondaryMap<Node, BlockId>,
    n: NodeId,
    u: NodeId,
) -> Option<BlockId> {
    if matches!(graph.op(u), Op::Phi { .. }) {
        let region = graph.input(u, 0)?;
        let mut lca: Option<BlockId> = None;
        for i in 1..graph.nins(u) {
            if graph.input(u, i) != Some(n) {
                continue;
            }
            let Some(pred) = graph.input(region, i).and_then(|p| cfg.block_of_cfg(p)) else {
                continue;
            };
            lca = Some(lca.map_or(pred, |l| dom.lca(l, pred)));
        }
        return lca;
    }
    let b = block_of[u];
    b.is_valid().then_some(b)
}

// =============================================================================
// Memory Conflicts
// =============================================================================

/// A memory effect a Load must be placed before.
#[derive(Debug, Clone, Copy)]
enum Conflict {
    /// A Store to the same alias.
    Store(NodeId),
    /// A Call, which may write anything.
    Call(NodeId),
    /// A memory Phi consuming the state along region predecessor `pred`.
    Merge { pred: BlockId, def: NodeId },
}

/// First writers of the Load's alias along the memory chain after the
/// state it reads. Stores to other aliases and allocations are looked
/// through.
fn conflicts(graph: &Graph, cfg: &Cfg, reachable: &BitSet, load: NodeId) -> Vec<Conflict> {
    let Op::Load { alias, .. } = *graph.op(load) else {
        return Vec::new();
    };
    let Some(mem) = graph.input(load, 1) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut seen = BitSet::new();
    let mut stack = vec![mem];
    while let Some(m) = stack.pop() {
        if !seen.insert(m.as_usize()) {
            continue;
        }
        for &u in graph.uses(m) {
            if !reachable.contains(u.as_usize()) {
                continue;
            }
            match graph.op(u) {
                Op::Store { alias: a, .. } if graph.input(u, 1) == Some(m) => {
                    if *a == alias {
                        out.push(Conflict::Store(u));
                    } else {
                        stack.push(u);
                    }
                }
                Op::New(_) if graph.input(u, 1) == Some(m) => {
                    stack.extend(
                        graph
                            .uses(u)
                            .iter()
                            .copied()
                            .filter(|&p| graph.op(p).proj_idx() == Some(0)),
                    );
                }
                Op::Call if graph.input(u, 1) == Some(m) => out.push(Conflict::Call(u)),
                Op::Phi { .. } => {
                    let Some(region) = graph.input(u, 0) else {
                        continue;
                    };
                    for i in 1..graph.nins(u) {
                        if graph.input(u, i) != Some(m) {
                            continue;
                        }
                        if let Some(pred) = graph.input(region, i).and_then(|p| cfg.block_of_cfg(p)) {
                            out.push(Conflict::Merge { pred, def: m });
                        }
                    }
                }
                _ => {}
            }
        }
    }
    out
}

// =============================================================================
// Scheduler
// =============================================================================

struct Gcm<'a> {
    graph: &'a Graph,
    cfg: &'a Cfg,
    dom: &'a DominatorTree,
    reachable: BitSet,
    early: SecondaryMap<Node, BlockId>,
    late: SecondaryMap<Node, BlockId>,
    /// Last Load that marked each block as a legal position.
    anti_mark: SecondaryMap<BasicBlock, NodeId>,
    anti_deps: FxHashMap<NodeId, Vec<NodeId>>,
}

/// Schedule every node reachable from Stop into a block of `cfg`.
pub fn global_code_motion(graph: &Graph, cfg: &Cfg, dom: &DominatorTree) -> Placement {
    let mut nodes = reachable_from_stop(graph);
    nodes.sort_unstable();
    let mut reachable = BitSet::with_capacity(graph.len());
    for &n in &nodes {
        reachable.insert(n.as_usize());
    }
    let mut gcm = Gcm {
        graph,
        cfg,
        dom,
        reachable,
        early: SecondaryMap::with_capacity(graph.len()),
        late: SecondaryMap::with_capacity(graph.len()),
        anti_mark: SecondaryMap::with_capacity(cfg.len()),
        anti_deps: FxHashMap::default(),
    };

    for &n in &nodes {
        gcm.sched_early(n);
    }
    gcm.sched_late();

    // Anything the readiness walk could not reach stays at its earliest
    // block, which dominates all of its uses.
    for &n in &nodes {
        if !gcm.late[n].is_valid() && gcm.early[n].is_valid() {
            log::warn!("gcm: {n} {} left at its early block", graph.op(n).name());
            let e = gcm.early[n];
            gcm.late.set(n, e);
        }
    }

    let nodes: Vec<NodeId> = nodes.into_iter().filter(|&n| gcm.late[n].is_valid()).collect();
    log::debug!("gcm: placed {} nodes in {} blocks", nodes.len(), cfg.len());
    Placement {
        block_of: gcm.late,
        early: gcm.early,
        anti_deps: gcm.anti_deps,
        nodes,
    }
}

impl Gcm<'_> {
    #[inline]
    fn depth(&self, b: BlockId) -> u32 {
        self.dom.depth(b)
    }

    /// Block an input holds for the early pass.
    fn input_block(&self, d: NodeId) -> Option<BlockId> {
        if let Some(b) = pinned_block(self.graph, self.cfg, d) {
            return Some(b);
        }
        let b = self.early[d];
        b.is_valid().then_some(b)
    }

    /// Compute early blocks for `root` and every floating input it needs,
    /// inputs first.
    fn sched_early(&mut self, root: NodeId) {
        let graph = self.graph;
        let mut stack = vec![(root, false)];
        while let Some((n, expanded)) = stack.pop() {
            if self.early[n].is_valid() {
                continue;
            }
            if let Some(b) = pinned_block(graph, self.cfg, n) {
                self.early.set(n, b);
                continue;
            }
            if graph.op(n).is_cfg() || (graph.op(n).is_pinned() && !is_new_proj(graph, n)) {
                // Pinned to unreachable control.
                continue;
            }
            if !expanded {
                stack.push((n, true));
                for &d in graph.node(n).inputs.iter().flatten() {
                    if !self.early[d].is_valid() {
                        stack.push((d, false));
                    }
                }
                continue;
            }

            let mut early = match graph.input(n, 0) {
                Some(c) if graph.is_cfg(c) => self.cfg.block_of_cfg(c).unwrap_or(self.cfg.entry),
                Some(c) if is_new_proj(graph, n) => self.early[c],
                _ => self.cfg.entry,
            };
            for i in 1..graph.nins(n) {
                let Some(d) = graph.input(n, i) else { continue };
                if let Some(b) = self.input_block(d) {
                    if self.depth(b) > self.depth(early) {
                        early = b;
                    }
                }
            }
            if early.is_valid() {
                self.early.set(n, early);
            }
        }
    }

    fn is_placed(&self, n: NodeId) -> bool {
        self.late[n].is_valid()
    }

    fn is_reachable(&self, n: NodeId) -> bool {
        self.reachable.contains(n.as_usize())
    }

    /// All uses placed, and for a Load every overwriting Store too.
    fn is_ready(&self, n: NodeId) -> bool {
        let graph = self.graph;
        let uses_done = graph
            .uses(n)
            .iter()
            .all(|&u| !self.is_reachable(u) || self.is_placed(u));
        if !uses_done {
            return false;
        }
        if matches!(graph.op(n), Op::Load { .. }) {
            return conflicts(graph, self.cfg, &self.reachable, n)
                .iter()
                .all(|c| match *c {
                    Conflict::Store(s) => self.is_placed(s),
                    _ => true,
                });
        }
        true
    }

    /// Place nodes bottom-up from Stop.
    fn sched_late(&mut self) {
        let graph = self.graph;
        let mut work = vec![graph.stop];
        while let Some(n) = work.pop() {
            if self.is_placed(n) || !self.is_reachable(n) {
                continue;
            }
            if let Some(b) = pinned_block(graph, self.cfg, n) {
                self.late.set(n, b);
            } else if graph.op(n).is_cfg() || !self.early[n].is_valid() {
                continue;
            } else if self.is_ready(n) {
                self.place(n);
            } else {
                continue;
            }

            for &d in graph.node(n).inputs.iter().flatten() {
                if self.is_placed(d) {
                    continue;
                }
                work.push(d);
                for &ld in graph.uses(d) {
                    if matches!(graph.op(ld), Op::Load { .. }) && !self.is_placed(ld) {
                        work.push(ld);
                    }
                }
            }
        }
    }

    fn place(&mut self, n: NodeId) {
        let graph = self.graph;
        let early = self.early[n];

        let mut lca: Option<BlockId> = None;
        for &u in graph.uses(n) {
            if !self.is_reachable(u) {
                continue;
            }
            if let Some(b) = use_block(graph, self.cfg, self.dom, &self.late, n, u) {
                lca = Some(lca.map_or(b, |l| self.dom.lca(l, b)));
            }
        }
        let mut lca = lca.unwrap_or(early);

        // New projections sit wherever their users want them for now; the
        // New itself picks the final block.
        if is_new_proj(graph, n) {
            self.late.set(n, lca);
            return;
        }
        if matches!(graph.op(n), Op::Load { .. }) {
            lca = self.anti_dep(n, lca, early);
        }

        let mut best = lca;
        let mut b = lca;
        while b != early {
            match self.dom.idom(b) {
                Some(up) => b = up,
                None => break,
            }
            if self.cfg.block(b).loop_depth < self.cfg.block(best).loop_depth {
                best = b;
            }
        }
        debug_assert!(
            self.dom.dominates(early, best),
            "{n} placed above its inputs"
        );
        self.late.set(n, best);
        log::trace!("gcm: {n} {} -> block {best}", graph.op(n).name());

        if matches!(graph.op(n), Op::New(_)) {
            for &p in graph.uses(n) {
                if self.is_reachable(p) {
                    self.late.set(p, best);
                }
            }
        }
    }

    /// Raise a Load's latest block above every write that could clobber
    /// the value it reads.
    fn anti_dep(&mut self, load: NodeId, mut lca: BlockId, early: BlockId) -> BlockId {
        let mut b = lca;
        loop {
            self.anti_mark.set(b, load);
            if b == early {
                break;
            }
            match self.dom.idom(b) {
                Some(up) => b = up,
                None => break,
            }
        }

        for c in conflicts(self.graph, self.cfg, &self.reachable, load) {
            lca = match c {
                Conflict::Store(st) => {
                    let (blk, def) = (self.late[st], self.early[st]);
                    self.raise(load, lca, blk, def, Some(st))
                }
                Conflict::Call(call) => match self.cfg.block_of_cfg(call) {
                    Some(blk) => self.raise(load, lca, blk, blk, None),
                    None => lca,
                },
                Conflict::Merge { pred, def } => {
                    let def = self.input_block(def).unwrap_or(self.cfg.entry);
                    self.raise(load, lca, pred, def, None)
                }
            };
        }
        lca
    }

    /// Walk from a writer's block up to its earliest block; the first block
    /// the Load could also occupy bounds the Load from below.
    fn raise(
        &mut self,
        load: NodeId,
        lca: BlockId,
        mut blk: BlockId,
        def: BlockId,
        store: Option<NodeId>,
    ) -> BlockId {
        if !blk.is_valid() {
            return lca;
        }
        loop {
            if self.anti_mark[blk] == load {
                let raised = self.dom.lca(blk, lca);
                if raised == blk {
                    if let Some(st) = store {
                        let loads = self.anti_deps.entry(st).or_default();
                        if !loads.contains(&load) {
                            loads.push(load);
                        }
                    }
                }
                return raised;
            }
            if blk == def {
                return lca;
            }
            match self.dom.idom(blk) {
                Some(up) => blk = up,
                None => return lca,
            }
        }
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Check that each floating node's block is dominated by its inputs'
/// blocks and dominates its uses' blocks.
pub fn verify(graph: &Graph, cfg: &Cfg, dom: &DominatorTree, p: &Placement) -> Result<(), String> {
    for &n in p.nodes() {
        if pinned_block(graph, cfg, n).is_some() {
            continue;
        }
        let Some(b) = p.block(n) else { continue };
        for &d in graph.node(n).inputs.iter().flatten() {
            let db = p.block(d).or_else(|| cfg.block_of_cfg(d));
            if let Some(db) = db {
                if !dom.dominates(db, b) {
                    return Err(format!(
                        "{n} {} in block {b} not dominated by input {d} in block {db}",
                        graph.op(n).name()
                    ));
                }
            }
        }
        for &u in graph.uses(n) {
            if p.block(u).is_none() {
                continue;
            }
            if let Some(ub) = use_block(graph, cfg, dom, &p.block_of, n, u) {
                if !dom.dominates(b, ub) {
                    return Err(format!(
                        "{n} {} in block {b} does not dominate use {u} in block {ub}",
                        graph.op(n).name()
                    ));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::loops::LoopTree;
    use crate::testing::{branch, entry, finish};
    use crate::types::Types;
    use std::rc::Rc;

    struct Built {
        g: Graph,
        cfg: Cfg,
        dom: DominatorTree,
        p: Placement,
    }

    fn schedule(g: Graph) -> Built {
        let mut cfg = Cfg::build(&g);
        let dom = DominatorTree::build(&cfg);
        LoopTree::compute(&mut cfg, &dom);
        let p = global_code_motion(&g, &cfg, &dom);
        Built { g, cfg, dom, p }
    }

    /// `while (arg < 10) arg = arg + 1; return arg;`
    fn counting_loop() -> (Built, NodeId, NodeId) {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        g.set_peephole(false);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let head = g.add(Op::Loop, &[None, Some(ctrl), None]);
        let phi = g.add(
            Op::Phi {
                label: Rc::from("arg"),
                min: int,
            },
            &[Some(head), Some(arg), None],
        );
        let ten = t.int_con(10);
        let c10 = g.con(&mut t, ten);
        let lt = g.new_node(&mut t, Op::Lt, &[None, Some(phi), Some(c10)]);
        let (body, exit) = branch(&mut g, &mut t, head, lt);
        let one = t.one;
        let c1 = g.con(&mut t, one);
        let add = g.new_node(&mut t, Op::Add, &[None, Some(phi), Some(c1)]);
        g.set_def(phi, 2, Some(add));
        g.set_def(head, 2, Some(body));
        finish(&mut g, &mut t, exit, mem, phi);
        (schedule(g), c1, add)
    }

    #[test]
    fn test_loop_invariant_constant_is_hoisted() {
        let (b, c1, add) = counting_loop();
        verify(&b.g, &b.cfg, &b.dom, &b.p).unwrap();
        let cb = b.p.block(c1).unwrap();
        assert_eq!(b.cfg.block(cb).loop_depth, 0);
        let ab = b.p.block(add).unwrap();
        assert_eq!(b.cfg.block(ab).loop_depth, 1);
        // The increment sits on the back edge, not in the header.
        assert!(matches!(b.g.op(b.cfg.block(ab).head), Op::CProj { idx: 0, .. }));
    }

    #[test]
    fn test_early_blocks_dominate_late_blocks() {
        let (b, _, _) = counting_loop();
        for &n in b.p.nodes() {
            if let (Some(e), Some(l)) = (b.p.early(n), b.p.block(n)) {
                assert!(b.dom.dominates(e, l), "{n}");
            }
        }
    }

    /// `v = arg.f; arg.f = 1; return v;` must read before it writes.
    #[test]
    fn test_load_before_store_records_anti_dependence() {
        let mut t = Types::new();
        let s = t.declare_struct("S");
        let int = t.int_bot;
        let alias = t.add_field(s, "f", int, false);
        let s = t.close_struct(s).unwrap_or(s);
        let ptr = t.ptr(2, s);
        let mut g = Graph::new(&mut t, ptr);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let ld = g.new_node(
            &mut t,
            Op::Load {
                name: Rc::from("f"),
                alias,
                decl: int,
            },
            &[None, Some(mem), Some(arg)],
        );
        g.keep(ld);
        let one = t.one;
        let c1 = g.con(&mut t, one);
        let st = g.new_node(
            &mut t,
            Op::Store {
                name: Rc::from("f"),
                alias,
            },
            &[None, Some(mem), Some(arg), Some(c1)],
        );
        finish(&mut g, &mut t, ctrl, st, ld);
        g.unkeep(ld);

        let b = schedule(g);
        verify(&b.g, &b.cfg, &b.dom, &b.p).unwrap();
        assert_eq!(b.p.block(ld), b.p.block(st));
        assert_eq!(b.p.anti_deps(st), &[ld]);
    }
}
