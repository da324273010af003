//! Natural loops and their nesting.
//!
//! A back edge is a CFG edge whose target dominates its source; every
//! block that reaches the source without passing the header belongs to
//! that header's loop. Nesting follows body containment, and each block's
//! loop depth is the depth of its innermost loop.

use super::cfg::{BlockId, Cfg, DominatorTree};
use crate::ir::arena::BitSet;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

// =============================================================================
// Loop Tree
// =============================================================================

/// Information about a natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header block.
    pub header: BlockId,

    /// Back edge sources (blocks that jump back to header).
    pub back_edges: Vec<BlockId>,

    /// All blocks in the loop body, header included.
    pub body: Vec<BlockId>,

    /// Parent loop (if nested).
    pub parent: Option<usize>,

    /// Child loops (nested).
    pub children: Vec<usize>,

    /// Loop depth (1 = outermost).
    pub depth: u32,

    /// Some body block branches out of the loop.
    pub has_exit: bool,
}

/// Loop nest of a CFG.
#[derive(Debug, Clone, Default)]
pub struct LoopTree {
    /// All detected loops.
    pub loops: Vec<Loop>,

    /// Map from header block to loop index.
    pub header_to_loop: FxHashMap<BlockId, usize>,

    /// Map from block to innermost containing loop.
    pub block_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopTree {
    /// Find loops and stamp each block's `loop_depth`.
    pub fn compute(cfg: &mut Cfg, dom: &DominatorTree) -> Self {
        let mut tree = LoopTree::default();

        for &block in &cfg.rpo {
            for &succ in &cfg.block(block).successors {
                if dom.dominates(succ, block) {
                    tree.add_loop(succ, block, cfg);
                }
            }
        }
        tree.compute_nesting();

        // Innermost loop wins: the one with the smallest body.
        for (idx, lp) in tree.loops.iter().enumerate() {
            for &b in &lp.body {
                let inner = match tree.block_to_loop.get(&b) {
                    Some(&cur) => tree.loops[cur].body.len() > lp.body.len(),
                    None => true,
                };
                if inner {
                    tree.block_to_loop.insert(b, idx);
                }
            }
        }

        for i in 0..cfg.len() {
            let b = BlockId::new(i as u32);
            cfg.block_mut(b).loop_depth = tree.loop_depth(b);
        }
        for lp in tree.loops.iter().filter(|lp| !lp.has_exit) {
            log::debug!("loop at block {} never exits", lp.header);
        }
        log::debug!("loop tree: {} loops", tree.loops.len());
        tree
    }

    /// Add a loop with the given header and back edge source.
    fn add_loop(&mut self, header: BlockId, back_edge: BlockId, cfg: &Cfg) {
        let loop_idx = match self.header_to_loop.get(&header) {
            Some(&idx) => {
                if self.loops[idx].back_edges.contains(&back_edge) {
                    return;
                }
                self.loops[idx].back_edges.push(back_edge);
                idx
            }
            None => {
                let idx = self.loops.len();
                self.loops.push(Loop {
                    header,
                    back_edges: vec![back_edge],
                    body: vec![header],
                    parent: None,
                    children: Vec::new(),
                    depth: 1,
                    has_exit: false,
                });
                self.header_to_loop.insert(header, idx);
                idx
            }
        };

        // Reverse walk from the back edge; the header stops it.
        let mut body = BitSet::with_capacity(cfg.len());
        for &b in &self.loops[loop_idx].body {
            body.insert(b.as_usize());
        }
        let mut worklist = VecDeque::new();
        worklist.push_back(back_edge);
        while let Some(block) = worklist.pop_front() {
            if body.insert(block.as_usize()) {
                worklist.extend(cfg.block(block).predecessors.iter().copied());
            }
        }

        let lp = &mut self.loops[loop_idx];
        lp.body = body.iter().map(|i| BlockId::new(i as u32)).collect();
        lp.has_exit = lp.body.iter().any(|&b| {
            cfg.block(b)
                .successors
                .iter()
                .any(|s| !body.contains(s.as_usize()))
        });
    }

    /// Parent is the smallest other loop containing the header.
    fn compute_nesting(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            let header = self.loops[i].header;
            let parent = (0..n)
                .filter(|&j| j != i && self.loops[j].body.contains(&header))
                .min_by_key(|&j| self.loops[j].body.len());
            if let Some(parent) = parent {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }
        for i in 0..n {
            let mut depth = 1;
            let mut current = self.loops[i].parent;
            while let Some(parent) = current {
                depth += 1;
                current = self.loops[parent].parent;
            }
            self.loops[i].depth = depth;
        }
    }

    /// Get the innermost loop containing a block.
    pub fn loop_for_block(&self, block: BlockId) -> Option<&Loop> {
        self.block_to_loop.get(&block).map(|&idx| &self.loops[idx])
    }

    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.block_to_loop.contains_key(&block)
    }

    /// Loop depth for a block (0 if not in loop).
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.loop_for_block(block).map_or(0, |lp| lp.depth)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::node::{NodeId, Op};
    use crate::testing::{branch, entry, finish};
    use crate::types::Types;

    /// Wrap a loop around `body` at `ctrl`; `body` gets the loop-side
    /// control and returns the control reaching the back edge.
    fn add_loop(
        g: &mut Graph,
        t: &mut Types,
        ctrl: NodeId,
        pred: NodeId,
        body: impl FnOnce(&mut Graph, &mut Types, NodeId) -> NodeId,
    ) -> NodeId {
        let head = g.add(Op::Loop, &[None, Some(ctrl), None]);
        let (tru, fal) = branch(g, t, head, pred);
        let back = body(g, t, tru);
        g.set_def(head, 2, Some(back));
        fal
    }

    #[test]
    fn test_nested_loop_depths() {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        g.set_peephole(false);
        let (ctrl, mem, arg) = entry(&mut g, &mut t);
        let exit = add_loop(&mut g, &mut t, ctrl, arg, |g, t, c| {
            add_loop(g, t, c, arg, |_, _, c| c)
        });
        finish(&mut g, &mut t, exit, mem, arg);

        let mut cfg = Cfg::build(&g);
        let dom = DominatorTree::build(&cfg);
        let loops = LoopTree::compute(&mut cfg, &dom);
        assert_eq!(loops.loops.len(), 2);

        let depth_of = |op: fn(&Op) -> bool| -> Vec<u32> {
            let mut ds: Vec<u32> = cfg
                .iter()
                .filter(|(_, b)| op(g.op(b.head)))
                .map(|(_, b)| b.loop_depth)
                .collect();
            ds.sort_unstable();
            ds
        };
        assert_eq!(depth_of(|op| matches!(op, Op::Loop)), vec![1, 2]);
        assert_eq!(depth_of(|op| matches!(op, Op::Start { .. } | Op::Stop)), vec![0, 0]);

        let inner = loops.loops.iter().find(|l| l.depth == 2).unwrap();
        let outer = &loops.loops[inner.parent.unwrap()];
        assert!(outer.body.len() > inner.body.len());
        assert!(inner.has_exit && outer.has_exit);
    }
}
