//! Sea-of-Nodes graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are never moved or freed, only killed
//! - **Use-def chains**: every filled input slot has a matching use entry
//! - **Value numbering**: a table of structurally unique nodes
//! - **Worklist**: nodes whose neighbourhood changed and need revisiting
//!
//! # Edge invariant
//!
//! For every node `n` and every slot `i` with `n.in(i) == Some(d)`, `n`
//! appears in `uses(d)` once per such slot. All edge edits go through
//! [`Graph::set_def`], [`Graph::add_def`], [`Graph::del_def`] and
//! [`Graph::subsume`], which maintain it; a node left with no uses and no
//! keep count is killed on the spot.

use super::arena::{Arena, SecondaryMap};
use super::node::{Inputs, Node, NodeFlags, NodeId, Op};
use crate::types::{TypeId, Types};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::rc::Rc;

// =============================================================================
// Statistics
// =============================================================================

/// Counters maintained while the graph is built and optimized.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    /// Peephole calls that replaced a node.
    pub peepholes: usize,
    /// Nodes popped off the worklist.
    pub iter_steps: usize,
    /// Value-numbering hits.
    pub gvn_hits: usize,
    /// Nodes killed.
    pub killed: usize,
    /// Type updates that moved up the lattice instead of down.
    pub monotone_violations: usize,
}

// =============================================================================
// Value Numbering Key
// =============================================================================

/// Operator and inputs of a node. The type is left out: it is computed
/// from the op payload and the input types alone, so equal keys always
/// yield equal types.
#[derive(Clone, PartialEq, Eq, Hash)]
struct GvnKey {
    op: Op,
    inputs: Inputs,
}

impl GvnKey {
    fn of(node: &Node) -> Self {
        // A Phi's label only names the variable for printing.
        let op = match &node.op {
            Op::Phi { min, .. } => Op::Phi {
                label: Rc::from(""),
                min: *min,
            },
            op => op.clone(),
        };
        GvnKey {
            op,
            inputs: node.inputs.clone(),
        }
    }
}

// =============================================================================
// Graph Structure
// =============================================================================

/// A Sea-of-Nodes graph.
pub struct Graph {
    nodes: Arena<Node>,
    uses: SecondaryMap<Node, Vec<NodeId>>,
    /// Nodes to revisit when the key node changes, beyond its direct uses.
    deps: SecondaryMap<Node, Vec<NodeId>>,
    gvn: FxHashMap<GvnKey, NodeId>,
    work: Vec<NodeId>,
    rng: Option<StdRng>,
    /// Run peepholes as nodes are built; types are still computed when off.
    peephole_on: bool,
    pub start: NodeId,
    pub stop: NodeId,
    pub stats: GraphStats,
}

impl Graph {
    /// Create a graph holding only Start (taking an argument of type `arg`)
    /// and an empty Stop.
    pub fn new(types: &mut Types, arg: TypeId) -> Self {
        let mut graph = Graph {
            nodes: Arena::with_capacity(256),
            uses: SecondaryMap::with_capacity(256),
            deps: SecondaryMap::new(),
            gvn: FxHashMap::default(),
            work: Vec::new(),
            rng: None,
            peephole_on: true,
            start: NodeId::INVALID,
            stop: NodeId::INVALID,
            stats: GraphStats::default(),
        };
        let start = graph.add(Op::Start { arg }, &[]);
        graph.nodes[start].ty = types.tuple(&[types.ctrl, types.mem_bot, arg]);
        graph.nodes[start].keep = 1;
        let stop = graph.add(Op::Stop, &[]);
        graph.nodes[stop].ty = types.bottom;
        graph.nodes[stop].keep = 1;
        graph.start = start;
        graph.stop = stop;
        graph
    }

    /// Pull worklist entries in a seeded random order instead of LIFO.
    pub fn set_worklist_seed(&mut self, seed: Option<u64>) {
        self.rng = seed.map(StdRng::seed_from_u64);
    }

    pub fn set_peephole(&mut self, on: bool) {
        self.peephole_on = on;
    }

    pub fn peephole_on(&self) -> bool {
        self.peephole_on
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> &Op {
        &self.nodes[id].op
    }

    #[inline]
    pub fn ty(&self, id: NodeId) -> TypeId {
        self.nodes[id].ty
    }

    #[inline]
    pub fn input(&self, id: NodeId, i: usize) -> Option<NodeId> {
        self.nodes[id].input(i)
    }

    #[inline]
    pub fn nins(&self, id: NodeId) -> usize {
        self.nodes[id].nins()
    }

    #[inline]
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        &self.uses[id]
    }

    /// Number of nodes ever allocated, dead ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_dead(&self, id: NodeId) -> bool {
        self.nodes[id].is_dead()
    }

    /// All nodes not yet killed.
    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_dead())
            .map(|(id, _)| id)
    }

    pub fn is_unused(&self, id: NodeId) -> bool {
        self.uses[id].is_empty() && self.nodes[id].keep == 0
    }

    pub fn is_cfg(&self, id: NodeId) -> bool {
        self.nodes[id].op.is_cfg()
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Allocate a node and register its uses. The type is left unset for
    /// the peephole pass to compute.
    pub fn add(&mut self, op: Op, inputs: &[Option<NodeId>]) -> NodeId {
        let id = self.nodes.alloc(Node::new(op, inputs));
        for d in inputs.iter().flatten() {
            self.uses.entry(*d).push(id);
        }
        log::trace!("new node {id}: {:?}", self.nodes[id]);
        id
    }

    // =========================================================================
    // Edge Editing
    // =========================================================================

    /// Replace input slot `i` of `n`. The previous def is killed if this
    /// was its last use.
    pub fn set_def(&mut self, n: NodeId, i: usize, new: Option<NodeId>) {
        let old = self.nodes[n].input(i);
        if old == new {
            return;
        }
        self.unlock(n);
        // Add the new use before dropping the old one, so a def that is
        // both old and new (at another slot) never looks unused.
        if let Some(d) = new {
            self.uses.entry(d).push(n);
        }
        let node = &mut self.nodes[n];
        if i >= node.inputs.len() {
            node.inputs.resize(i + 1, None);
        }
        node.inputs[i] = new;
        if let Some(o) = old {
            self.del_use(o, n);
            if self.is_unused(o) {
                self.kill(o);
            }
        }
        self.move_deps_to_worklist(n);
    }

    /// Append an input slot.
    pub fn add_def(&mut self, n: NodeId, new: Option<NodeId>) {
        self.unlock(n);
        self.nodes[n].inputs.push(new);
        if let Some(d) = new {
            self.uses.entry(d).push(n);
        }
    }

    /// Remove input slot `i`, shifting later slots down.
    pub fn del_def(&mut self, n: NodeId, i: usize) {
        self.unlock(n);
        let old = self.nodes[n].inputs.remove(i);
        if let Some(o) = old {
            self.del_use(o, n);
            if self.is_unused(o) {
                self.kill(o);
            }
        }
    }

    /// Exchange input slots 1 and 2 of a commutative binary node.
    pub fn swap12(&mut self, n: NodeId) -> NodeId {
        self.unlock(n);
        self.nodes[n].inputs.swap(1, 2);
        n
    }

    fn del_use(&mut self, def: NodeId, user: NodeId) {
        let list = self.uses.entry(def);
        if let Some(pos) = list.iter().position(|&u| u == user) {
            list.swap_remove(pos);
        }
    }

    /// Redirect every use of `old` to `new` and kill `old`.
    pub fn subsume(&mut self, old: NodeId, new: NodeId) {
        debug_assert_ne!(old, new);
        while let Some(user) = self.uses.entry(old).pop() {
            self.unlock(user);
            let node = &mut self.nodes[user];
            if let Some(slot) = node.inputs.iter_mut().find(|x| **x == Some(old)) {
                *slot = Some(new);
            }
            self.uses.entry(new).push(user);
            self.push_work(user);
        }
        if self.is_unused(old) {
            self.kill(old);
        }
    }

    /// Kill an unused node, and transitively every input it was the last
    /// use of.
    pub fn kill(&mut self, n: NodeId) {
        let mut stack = vec![n];
        while let Some(n) = stack.pop() {
            if self.nodes[n].is_dead() || !self.is_unused(n) {
                continue;
            }
            self.unlock(n);
            self.move_deps_to_worklist(n);
            let inputs = std::mem::take(&mut self.nodes[n].inputs);
            let node = &mut self.nodes[n];
            node.flags.insert(NodeFlags::DEAD);
            node.ty = TypeId::INVALID;
            self.stats.killed += 1;
            log::trace!("killed {n}");
            for d in inputs.into_iter().rev().flatten() {
                self.del_use(d, n);
                if self.is_unused(d) {
                    stack.push(d);
                } else {
                    // Lost a use; it may simplify now.
                    self.push_work(d);
                }
            }
        }
    }

    // =========================================================================
    // Keep Counts
    // =========================================================================

    /// Hold `n` alive while it has no uses.
    pub fn keep(&mut self, n: NodeId) -> NodeId {
        self.nodes[n].keep += 1;
        n
    }

    pub fn unkeep(&mut self, n: NodeId) -> NodeId {
        let node = &mut self.nodes[n];
        debug_assert!(node.keep > 0, "unbalanced unkeep of {n}");
        node.keep = node.keep.saturating_sub(1);
        n
    }

    // =========================================================================
    // Value Numbering
    // =========================================================================

    /// Remove `n` from the value-numbering table before its key changes.
    pub fn unlock(&mut self, n: NodeId) {
        let node = &mut self.nodes[n];
        if !node.flags.contains(NodeFlags::IN_GVN) {
            return;
        }
        node.flags.remove(NodeFlags::IN_GVN);
        let key = GvnKey::of(node);
        if self.gvn.get(&key) == Some(&n) {
            self.gvn.remove(&key);
        }
    }

    /// Find a structurally equal node, or enter `n` as the representative.
    pub fn gvn_lookup(&mut self, n: NodeId) -> Option<NodeId> {
        let node = &self.nodes[n];
        if node.flags.contains(NodeFlags::IN_GVN) {
            return None;
        }
        let key = GvnKey::of(node);
        match self.gvn.get(&key) {
            Some(&hit) if hit != n && !self.nodes[hit].is_dead() => {
                self.stats.gvn_hits += 1;
                Some(hit)
            }
            _ => {
                self.gvn.insert(key, n);
                self.nodes[n].flags.insert(NodeFlags::IN_GVN);
                None
            }
        }
    }

    /// Number of nodes currently in the value-numbering table.
    pub fn gvn_len(&self) -> usize {
        self.gvn.len()
    }

    // =========================================================================
    // Dependencies and Worklist
    // =========================================================================

    /// Revisit `dep` whenever `n` changes. Used by rules that looked past
    /// their direct inputs.
    pub fn add_dep(&mut self, n: NodeId, dep: NodeId) {
        if n == dep || self.nodes[n].is_dead() {
            return;
        }
        let list = self.deps.entry(n);
        if !list.contains(&dep) {
            list.push(dep);
        }
    }

    pub fn move_deps_to_worklist(&mut self, n: NodeId) {
        let deps = std::mem::take(self.deps.entry(n));
        for d in deps {
            self.push_work(d);
        }
    }

    pub fn push_work(&mut self, n: NodeId) {
        let node = &mut self.nodes[n];
        if node.is_dead() || node.flags.contains(NodeFlags::ON_WORKLIST) {
            return;
        }
        node.flags.insert(NodeFlags::ON_WORKLIST);
        self.work.push(n);
    }

    pub fn push_uses(&mut self, n: NodeId) {
        for i in 0..self.uses[n].len() {
            let u = self.uses[n][i];
            self.push_work(u);
        }
    }

    /// Next node to revisit; random when seeded.
    pub fn pop_work(&mut self) -> Option<NodeId> {
        loop {
            let n = match &mut self.rng {
                Some(rng) if !self.work.is_empty() => {
                    let i = rng.gen_range(0..self.work.len());
                    self.work.swap_remove(i)
                }
                _ => self.work.pop()?,
            };
            self.nodes[n].flags.remove(NodeFlags::ON_WORKLIST);
            if !self.nodes[n].is_dead() {
                return Some(n);
            }
        }
    }

    pub fn work_len(&self) -> usize {
        self.work.len()
    }

    // =========================================================================
    // Node-level Dominators
    // =========================================================================

    /// Immediate dominator of a control node, computed from the graph
    /// alone. `depth` memoizes dominator-tree depths for one query.
    pub fn cfg_idom(&self, n: NodeId, depth: &mut FxHashMap<NodeId, u32>) -> Option<NodeId> {
        let node = &self.nodes[n];
        match node.op {
            Op::Start { .. } => None,
            Op::Loop | Op::Fun { .. } => node.input(1),
            Op::Region => {
                let mut preds = node.inputs.iter().skip(1).flatten().copied();
                let first = preds.next()?;
                Some(preds.fold(first, |lca, p| self.cfg_lca(lca, p, depth)))
            }
            Op::Stop => Some(self.start),
            _ => node.input(0),
        }
    }

    /// Depth in the node-level dominator tree.
    pub fn cfg_idepth(&self, n: NodeId, depth: &mut FxHashMap<NodeId, u32>) -> u32 {
        if let Some(&d) = depth.get(&n) {
            return d;
        }
        // Placeholder guards against malformed cycles.
        depth.insert(n, 0);
        let d = match self.cfg_idom(n, depth) {
            Some(i) if i != n => self.cfg_idepth(i, depth) + 1,
            _ => 0,
        };
        depth.insert(n, d);
        d
    }

    fn cfg_lca(&self, mut a: NodeId, mut b: NodeId, depth: &mut FxHashMap<NodeId, u32>) -> NodeId {
        while a != b {
            let (da, db) = (self.cfg_idepth(a, depth), self.cfg_idepth(b, depth));
            if da >= db {
                match self.cfg_idom(a, depth) {
                    Some(i) => a = i,
                    None => return a,
                }
            }
            if db >= da {
                match self.cfg_idom(b, depth) {
                    Some(i) => b = i,
                    None => return b,
                }
            }
        }
        a
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check the edge invariant over all live nodes. Returns the first
    /// offending pair `(user, def)`.
    pub fn verify_edges(&self) -> Result<(), (NodeId, NodeId)> {
        for n in self.live_nodes() {
            for d in self.nodes[n].inputs.iter().flatten() {
                let slots = self.nodes[n].inputs.iter().filter(|x| **x == Some(*d)).count();
                let uses = self.uses[*d].iter().filter(|&&u| u == n).count();
                if slots != uses || self.nodes[*d].is_dead() {
                    return Err((n, *d));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.nodes.iter() {
            if !node.is_dead() {
                writeln!(f, "  {id}: {node:?}")?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
