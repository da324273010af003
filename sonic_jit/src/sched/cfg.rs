//! Basic blocks and dominators over the control sub-graph.
//!
//! Sea-of-Nodes keeps control as plain edges; scheduling needs explicit
//! blocks. A block starts at a *head* control node (Start, Region, Loop,
//! Fun, a control projection, CallEnd or Stop) and ends at an optional
//! *tail* (If, Return or Call) reached by following control inputs.
//!
//! # Structure
//!
//! Only control reachable forward from Start is included. Block ids are
//! dense and assigned in discovery order; `rpo` lists them in reverse
//! post-order for dataflow and printing.

use crate::ir::arena::{BitSet, Id, SecondaryMap};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId, Op};

// =============================================================================
// Basic Block
// =============================================================================

/// A basic block in the CFG.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// The control node that starts this block.
    pub head: NodeId,

    /// The branch, return or call ending this block, if any.
    pub tail: Option<NodeId>,

    /// Predecessor blocks.
    pub predecessors: Vec<BlockId>,

    /// Successor blocks; for an If tail, the true side comes first.
    pub successors: Vec<BlockId>,

    /// Nodes in execution order (filled by the local scheduler).
    pub nodes: Vec<NodeId>,

    /// Loop depth (0 = not in loop).
    pub loop_depth: u32,
}

impl BasicBlock {
    fn new(head: NodeId) -> Self {
        BasicBlock {
            head,
            tail: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
            nodes: Vec::new(),
            loop_depth: 0,
        }
    }
}

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

/// Control nodes that start a block.
pub fn is_block_head(op: &Op) -> bool {
    matches!(
        op,
        Op::Start { .. }
            | Op::Stop
            | Op::Region
            | Op::Loop
            | Op::Fun { .. }
            | Op::CProj { .. }
            | Op::CallEnd
    )
}

// =============================================================================
// CFG
// =============================================================================

/// Control Flow Graph extracted from Sea-of-Nodes.
#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,

    /// Block of every reachable control node.
    block_of: SecondaryMap<Node, BlockId>,

    /// Entry block (corresponds to Start).
    pub entry: BlockId,

    /// Exit block (corresponds to Stop), if Stop is reachable.
    pub exit: Option<BlockId>,

    /// Reverse postorder traversal.
    pub rpo: Vec<BlockId>,

    /// Postorder numbers for dominance computation.
    pub postorder: SecondaryMap<BasicBlock, u32>,
}

impl Cfg {
    /// Build the CFG from a Sea-of-Nodes graph.
    pub fn build(graph: &Graph) -> Self {
        let mut cfg = Cfg::empty();

        // Forward walk over control, creating a block per head.
        let mut visited = BitSet::with_capacity(graph.len());
        let mut order = Vec::new();
        let mut stack = vec![graph.start];
        while let Some(c) = stack.pop() {
            if !visited.insert(c.as_usize()) {
                continue;
            }
            order.push(c);
            if is_block_head(graph.op(c)) {
                cfg.add_block(c);
            }
            for &u in graph.uses(c).iter().rev() {
                if !graph.is_dead(u) && Self::is_control_edge(graph, c, u) {
                    stack.push(u);
                }
            }
        }
        cfg.entry = cfg.block_of[graph.start];

        // Non-head control nodes belong to the block of their control input.
        for &c in &order {
            if cfg.block_of[c].is_valid() {
                continue;
            }
            let mut h = c;
            while !is_block_head(graph.op(h)) {
                match graph.input(h, 0) {
                    Some(p) => h = p,
                    None => break,
                }
            }
            let b = cfg.block_of[h];
            cfg.block_of.set(c, b);
            if b.is_valid() && matches!(graph.op(c), Op::If | Op::Return | Op::Call) {
                cfg.blocks[b.as_usize()].tail = Some(c);
            }
        }

        // Edges, from each block's control nodes to the heads they feed. A
        // head may feed a Fun directly while its tail feeds the rest.
        for i in 0..cfg.blocks.len() {
            let b = BlockId::new(i as u32);
            let bb = &cfg.blocks[i];
            let sources: Vec<NodeId> = std::iter::once(bb.head).chain(bb.tail).collect();
            for c in sources {
                for s in Self::head_succs(graph, c, |u| visited.contains(u.as_usize())) {
                    let sb = cfg.block_of[s];
                    cfg.add_edge(b, sb);
                }
            }
        }
        if visited.contains(graph.stop.as_usize()) {
            cfg.exit = Some(cfg.block_of[graph.stop]);
        }

        cfg.compute_rpo();
        log::debug!("cfg: {} blocks", cfg.blocks.len());
        cfg
    }

    fn empty() -> Self {
        Cfg {
            blocks: Vec::new(),
            block_of: SecondaryMap::new(),
            entry: BlockId::INVALID,
            exit: None,
            rpo: Vec::new(),
            postorder: SecondaryMap::new(),
        }
    }

    /// Is `u` a control successor of `c` (as opposed to a data use)?
    fn is_control_edge(graph: &Graph, c: NodeId, u: NodeId) -> bool {
        let op = graph.op(u);
        if !op.is_cfg() {
            return false;
        }
        if op.is_region() || matches!(op, Op::Stop) {
            graph.node(u).inputs.iter().skip(1).any(|&x| x == Some(c))
                || (matches!(op, Op::Stop) && graph.input(u, 0) == Some(c))
        } else {
            graph.input(u, 0) == Some(c)
        }
    }

    /// Rebuild the edges of an existing block set from the scheduled node
    /// order alone: each block continues into the heads its scheduled
    /// control nodes feed.
    pub fn rederive(&self, graph: &Graph) -> Cfg {
        let mut cfg = Cfg::empty();
        for bb in &self.blocks {
            cfg.add_block(bb.head);
        }
        for bb in &self.blocks {
            for &n in &bb.nodes {
                if graph.is_cfg(n) && !is_block_head(graph.op(n)) {
                    cfg.block_of.set(n, self.block_of[bb.head]);
                }
            }
        }
        cfg.entry = self.entry;
        cfg.exit = self.exit;
        for (i, bb) in self.blocks.iter().enumerate() {
            for &c in bb.nodes.iter().filter(|&&n| graph.is_cfg(n)) {
                for s in Self::head_succs(graph, c, |u| cfg.block_of[u].is_valid()) {
                    let sb = cfg.block_of[s];
                    cfg.add_edge(BlockId::new(i as u32), sb);
                }
            }
        }
        cfg.compute_rpo();
        cfg
    }

    /// Block heads fed by control node `c`, projections in index order.
    fn head_succs(graph: &Graph, c: NodeId, known: impl Fn(NodeId) -> bool) -> Vec<NodeId> {
        let mut succs: Vec<NodeId> = graph
            .uses(c)
            .iter()
            .copied()
            .filter(|&u| !graph.is_dead(u) && known(u) && is_block_head(graph.op(u)))
            .filter(|&u| Self::is_control_edge(graph, c, u))
            .collect();
        succs.sort_by_key(|&u| (graph.op(u).proj_idx().unwrap_or(0), u));
        succs.dedup();
        succs
    }

    fn add_block(&mut self, head: NodeId) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(head));
        self.block_of.set(head, id);
        id
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from.as_usize()].successors.contains(&to) {
            self.blocks[from.as_usize()].successors.push(to);
        }
        if !self.blocks[to.as_usize()].predecessors.contains(&from) {
            self.blocks[to.as_usize()].predecessors.push(from);
        }
    }

    fn compute_rpo(&mut self) {
        if !self.entry.is_valid() {
            return;
        }
        let mut visited = BitSet::with_capacity(self.blocks.len());
        let mut postorder = Vec::with_capacity(self.blocks.len());
        self.dfs_postorder(self.entry, &mut visited, &mut postorder);
        for (i, &block) in postorder.iter().enumerate() {
            self.postorder.set(block, i as u32);
        }
        postorder.reverse();
        self.rpo = postorder;
    }

    fn dfs_postorder(&self, block: BlockId, visited: &mut BitSet, postorder: &mut Vec<BlockId>) {
        if !visited.insert(block.as_usize()) {
            return;
        }
        for &succ in &self.blocks[block.as_usize()].successors {
            self.dfs_postorder(succ, visited, postorder);
        }
        postorder.push(block);
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.as_usize()]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.as_usize()]
    }

    /// Block holding a control node, if that node is reachable.
    pub fn block_of_cfg(&self, n: NodeId) -> Option<BlockId> {
        let b = self.block_of[n];
        b.is_valid().then_some(b)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over blocks in reverse postorder.
    pub fn iter_rpo(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.rpo
            .iter()
            .copied()
            .map(move |id| (id, &self.blocks[id.as_usize()]))
    }

    /// Iterate over all blocks.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i as u32), b))
    }
}

// =============================================================================
// Dominator Tree
// =============================================================================

/// Dominator tree for the CFG.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator for each block (the entry maps to itself).
    idom: SecondaryMap<BasicBlock, BlockId>,

    /// Dominator tree children.
    children: SecondaryMap<BasicBlock, Vec<BlockId>>,

    /// Dominator tree depth.
    depth: SecondaryMap<BasicBlock, u32>,
}

impl DominatorTree {
    /// Build with the Cooper-Harvey-Kennedy iterative algorithm.
    pub fn build(cfg: &Cfg) -> Self {
        let n = cfg.len();
        let mut dom = DominatorTree {
            idom: SecondaryMap::with_capacity(n),
            children: SecondaryMap::with_capacity(n),
            depth: SecondaryMap::with_capacity(n),
        };
        if n == 0 || !cfg.entry.is_valid() {
            return dom;
        }
        for i in 0..n {
            dom.idom.set(BlockId::new(i as u32), BlockId::INVALID);
        }
        dom.idom.set(cfg.entry, cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &cfg.rpo {
                if block == cfg.entry {
                    continue;
                }
                let preds = &cfg.block(block).predecessors;
                let mut new_idom = BlockId::INVALID;
                for &pred in preds {
                    if !dom.idom[pred].is_valid() {
                        continue;
                    }
                    new_idom = if new_idom.is_valid() {
                        dom.intersect(pred, new_idom, cfg)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && dom.idom[block] != new_idom {
                    dom.idom.set(block, new_idom);
                    changed = true;
                }
            }
        }

        for &block in &cfg.rpo {
            if block == cfg.entry {
                continue;
            }
            let idom = dom.idom[block];
            if idom.is_valid() {
                dom.children.entry(idom).push(block);
            }
        }
        dom.compute_depths(cfg.entry);
        dom
    }

    /// Walk both fingers up until they meet; a finger with the smaller
    /// postorder number is the deeper one.
    fn intersect(&self, mut b1: BlockId, mut b2: BlockId, cfg: &Cfg) -> BlockId {
        while b1 != b2 {
            while cfg.postorder[b1] < cfg.postorder[b2] {
                b1 = self.idom[b1];
            }
            while cfg.postorder[b2] < cfg.postorder[b1] {
                b2 = self.idom[b2];
            }
        }
        b1
    }

    fn compute_depths(&mut self, entry: BlockId) {
        let mut stack = vec![(entry, 0)];
        while let Some((block, depth)) = stack.pop() {
            self.depth.set(block, depth);
            for &child in &self.children[block] {
                stack.push((child, depth + 1));
            }
        }
    }

    /// Immediate dominator; `None` for the entry.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idom = self.idom[block];
        if idom.is_valid() && idom != block {
            Some(idom)
        } else {
            None
        }
    }

    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth[block]
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(idom) = self.idom(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Deepest block dominating both.
    pub fn lca(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while a != b {
            if self.depth(a) >= self.depth(b) {
                match self.idom(a) {
                    Some(i) => a = i,
                    None => return a,
                }
            } else {
                match self.idom(b) {
                    Some(i) => b = i,
                    None => return b,
                }
            }
        }
        a
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::testing::{branch, entry, finish};
    use crate::types::Types;

    /// `return arg ? 1 : 2;` shaped as a diamond with a Phi.
    fn diamond() -> (Graph, Types) {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        // Built raw so the empty diamond is not folded away.
        g.set_peephole(false);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let (tru, fal) = branch(&mut g, &mut t, ctrl, arg);
        let r = g.new_node(&mut t, Op::Region, &[None, Some(tru), Some(fal)]);
        let one = t.one;
        let c1 = g.con(&mut t, one);
        let two = t.int_con(2);
        let c2 = g.con(&mut t, two);
        let phi = g.new_node(
            &mut t,
            Op::Phi {
                label: "a".into(),
                min: int,
            },
            &[Some(r), Some(c1), Some(c2)],
        );
        finish(&mut g, &mut t, r, mem, phi);
        (g, t)
    }

    #[test]
    fn test_diamond_blocks_and_dominators() {
        let (g, _t) = diamond();
        let cfg = Cfg::build(&g);
        // Start, entry projection, two arms, the merge and Stop.
        assert_eq!(cfg.len(), 6);
        let dom = DominatorTree::build(&cfg);
        let entry_proj = cfg.block(cfg.entry).successors[0];
        let merge = cfg
            .iter()
            .find(|(_, b)| matches!(g.op(b.head), Op::Region))
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(dom.idom(merge), Some(entry_proj));
        assert!(matches!(g.op(cfg.block(entry_proj).tail.unwrap()), Op::If));
        let arms = &cfg.block(entry_proj).successors;
        assert_eq!(arms.len(), 2);
        assert_eq!(g.op(cfg.block(arms[0]).head).proj_idx(), Some(0));
        for &a in arms {
            assert_eq!(dom.idom(a), Some(entry_proj));
            assert!(!dom.dominates(a, merge));
        }
        assert_eq!(dom.lca(arms[0], arms[1]), entry_proj);
        let exit = cfg.exit.unwrap();
        assert!(dom.dominates(cfg.entry, exit));
        assert_eq!(cfg.rpo[0], cfg.entry);
    }
}
