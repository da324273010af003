//! Compilation session and phase driver.
//!
//! A [`CodeGen`] owns everything one compilation mutates: the node graph
//! (with its GVN table and worklist), the type table, and the results of
//! each scheduling phase. Phases run strictly in order:
//!
//! 1. **Parse**: the front end builds the graph through [`CodeGen::graph`]
//! 2. **Opto**: worklist peepholes to a fixpoint
//! 3. **TypeCheck**: lattice-level errors on the converged types
//! 4. **LoopTree**: blocks, dominators and loop depths
//! 5. **Gcm**: a home block for every floating node
//! 6. **LocalSched**: node order inside every block

use crate::error::Result;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::opt::{iterate, type_check, IterStats};
use crate::sched::{
    check_round_trip, global_code_motion, gcm, local_schedule, BlockId, Cfg, DominatorTree,
    LoopTree, Placement,
};
use crate::types::{TypeId, Types};
use std::fmt::Write;

// =============================================================================
// Configuration
// =============================================================================

/// Declared type of the program argument `arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgType {
    #[default]
    Int,
    Flt,
    Bool,
    U8,
    I32,
}

impl ArgType {
    fn resolve(self, types: &mut Types) -> TypeId {
        match self {
            ArgType::Int => types.int_bot,
            ArgType::Flt => types.f64_ty,
            ArgType::Bool => types.bool_ty,
            ArgType::U8 => types.int(0, 255),
            ArgType::I32 => types.int(i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// Configuration for one compilation.
#[derive(Debug, Clone)]
pub struct CodeGenConfig {
    /// Run peepholes as nodes are built.
    pub peephole_at_construction: bool,

    /// Pull the worklist in a seeded random order instead of LIFO.
    pub worklist_seed: Option<u64>,

    /// Worklist fuel for the opto phase.
    pub max_iterations: usize,

    /// Declared type of `arg`.
    pub arg_type: ArgType,
}

impl Default for CodeGenConfig {
    fn default() -> Self {
        Self {
            peephole_at_construction: true,
            worklist_seed: None,
            max_iterations: 100_000,
            arg_type: ArgType::Int,
        }
    }
}

impl CodeGenConfig {
    /// Build the graph as written; all optimization happens in opto.
    pub fn minimal() -> Self {
        Self {
            peephole_at_construction: false,
            ..Self::default()
        }
    }

    /// Optimize at construction and again to a fixpoint.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, arg_type: ArgType) -> Self {
        self.arg_type = arg_type;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.worklist_seed = Some(seed);
        self
    }
}

// =============================================================================
// Phases
// =============================================================================

/// Pipeline phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Parse,
    Opto,
    TypeCheck,
    LoopTree,
    Gcm,
    LocalSched,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Parse,
        Phase::Opto,
        Phase::TypeCheck,
        Phase::LoopTree,
        Phase::Gcm,
        Phase::LocalSched,
    ];

    fn next(self) -> Option<Phase> {
        let i = Phase::ALL.iter().position(|&p| p == self)?;
        Phase::ALL.get(i + 1).copied()
    }
}

// =============================================================================
// Backend View
// =============================================================================

/// One scheduled block as handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockView {
    pub id: BlockId,
    /// Control node starting the block.
    pub head: NodeId,
    /// Nodes in execution order with their types.
    pub nodes: Vec<(NodeId, TypeId)>,
    pub loop_depth: u32,
    /// Head of the immediately dominating block.
    pub idom: Option<NodeId>,
}

// =============================================================================
// CodeGen
// =============================================================================

/// A compilation session.
pub struct CodeGen {
    pub graph: Graph,
    pub types: Types,
    pub config: CodeGenConfig,
    /// Last completed phase.
    phase: Option<Phase>,
    /// What the opto phase did.
    pub iter_stats: IterStats,
    cfg: Option<Cfg>,
    dom: Option<DominatorTree>,
    loops: Option<LoopTree>,
    placement: Option<Placement>,
}

impl CodeGen {
    pub fn new(config: CodeGenConfig) -> Self {
        let mut types = Types::new();
        let arg = config.arg_type.resolve(&mut types);
        let mut graph = Graph::new(&mut types, arg);
        graph.set_peephole(config.peephole_at_construction);
        graph.set_worklist_seed(config.worklist_seed);
        CodeGen {
            graph,
            types,
            config,
            phase: None,
            iter_stats: IterStats::default(),
            cfg: None,
            dom: None,
            loops: None,
            placement: None,
        }
    }

    /// Last completed phase, if any.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        let expected = match self.phase {
            None => Some(Phase::Parse),
            Some(p) => p.next(),
        };
        assert_eq!(
            expected,
            Some(phase),
            "phase {phase:?} run out of order (last completed: {:?})",
            self.phase
        );
    }

    /// Record that the front end finished building the graph.
    pub fn finish_parse(&mut self) -> &mut Self {
        self.enter(Phase::Parse);
        self.phase = Some(Phase::Parse);
        log::debug!("parse: {} live nodes", self.graph.live_nodes().count());
        self
    }

    /// Run every phase after the last completed one, up to and including
    /// `target`. Parsing must already be done.
    pub fn driver(&mut self, target: Phase) -> Result<&mut Self> {
        assert!(self.phase.is_some(), "driver called before parsing");
        while self.phase < Some(target) {
            match self.phase.and_then(Phase::next) {
                Some(Phase::Opto) => {
                    self.opto();
                }
                Some(Phase::TypeCheck) => {
                    self.type_check()?;
                }
                Some(Phase::LoopTree) => {
                    self.loop_tree();
                }
                Some(Phase::Gcm) => {
                    self.gcm();
                }
                Some(Phase::LocalSched) => {
                    self.local_sched();
                }
                Some(Phase::Parse) | None => break,
            }
        }
        Ok(self)
    }

    /// Drain the peephole worklist.
    pub fn opto(&mut self) -> &mut Self {
        self.enter(Phase::Opto);
        let fuel = self.config.max_iterations;
        self.iter_stats = iterate(&mut self.graph, &mut self.types, fuel);
        self.phase = Some(Phase::Opto);
        log::debug!(
            "opto: {} steps, {} live nodes, {} peepholes",
            self.iter_stats.steps,
            self.graph.live_nodes().count(),
            self.graph.stats.peepholes
        );
        self
    }

    pub fn type_check(&mut self) -> Result<&mut Self> {
        self.enter(Phase::TypeCheck);
        type_check(&self.graph, &mut self.types)?;
        self.phase = Some(Phase::TypeCheck);
        log::debug!("type_check: ok");
        Ok(self)
    }

    pub fn loop_tree(&mut self) -> &mut Self {
        self.enter(Phase::LoopTree);
        let mut cfg = Cfg::build(&self.graph);
        let dom = DominatorTree::build(&cfg);
        let loops = LoopTree::compute(&mut cfg, &dom);
        log::debug!(
            "loop_tree: {} blocks, {} loops",
            cfg.len(),
            loops.loops.len()
        );
        self.cfg = Some(cfg);
        self.dom = Some(dom);
        self.loops = Some(loops);
        self.phase = Some(Phase::LoopTree);
        self
    }

    pub fn gcm(&mut self) -> &mut Self {
        self.enter(Phase::Gcm);
        if let (Some(cfg), Some(dom)) = (&self.cfg, &self.dom) {
            let placement = global_code_motion(&self.graph, cfg, dom);
            debug_assert_eq!(gcm::verify(&self.graph, cfg, dom, &placement), Ok(()));
            self.placement = Some(placement);
        }
        self.phase = Some(Phase::Gcm);
        self
    }

    pub fn local_sched(&mut self) -> &mut Self {
        self.enter(Phase::LocalSched);
        if let (Some(cfg), Some(placement)) = (&mut self.cfg, &self.placement) {
            local_schedule(&self.graph, cfg, placement);
            if let Some(dom) = &self.dom {
                debug_assert_eq!(check_round_trip(&self.graph, cfg, dom), Ok(()));
            }
        }
        self.phase = Some(Phase::LocalSched);
        self
    }

    // =========================================================================
    // Results
    // =========================================================================

    pub fn cfg(&self) -> Option<&Cfg> {
        self.cfg.as_ref()
    }

    pub fn dom(&self) -> Option<&DominatorTree> {
        self.dom.as_ref()
    }

    pub fn loops(&self) -> Option<&LoopTree> {
        self.loops.as_ref()
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    /// Block holding `n`: its home block once scheduled, otherwise the
    /// block of a control node.
    pub fn block_of(&self, n: NodeId) -> Option<BlockId> {
        self.placement
            .as_ref()
            .and_then(|p| p.block(n))
            .or_else(|| self.cfg.as_ref()?.block_of_cfg(n))
    }

    /// Loop depth of the block holding `n` (0 outside loops).
    pub fn loop_depth(&self, n: NodeId) -> u32 {
        match (self.block_of(n), &self.cfg) {
            (Some(b), Some(cfg)) => cfg.block(b).loop_depth,
            _ => 0,
        }
    }

    /// Head of the block immediately dominating the block of `n`.
    pub fn idom(&self, n: NodeId) -> Option<NodeId> {
        let b = self.block_of(n)?;
        let up = self.dom.as_ref()?.idom(b)?;
        Some(self.cfg.as_ref()?.block(up).head)
    }

    /// Scheduled blocks in reverse postorder.
    pub fn blocks(&self) -> Vec<BlockView> {
        let (Some(cfg), Some(dom)) = (&self.cfg, &self.dom) else {
            return Vec::new();
        };
        cfg.iter_rpo()
            .map(|(id, bb)| BlockView {
                id,
                head: bb.head,
                nodes: bb.nodes.iter().map(|&n| (n, self.graph.ty(n))).collect(),
                loop_depth: bb.loop_depth,
                idom: dom.idom(id).map(|d| cfg.block(d).head),
            })
            .collect()
    }

    /// The program as `return` statements.
    pub fn print(&self) -> String {
        self.graph.print(&self.types)
    }

    /// Blocks in reverse postorder with their ordered nodes and types.
    pub fn print_schedule(&self) -> String {
        let mut out = String::new();
        for bb in self.blocks() {
            let idom = bb.idom.map_or_else(|| "-".to_string(), |d| d.to_string());
            let _ = writeln!(
                out,
                "B{} {}{} depth={} idom={}",
                bb.id,
                self.graph.op(bb.head).name(),
                bb.head,
                bb.loop_depth,
                idom
            );
            for (n, t) in bb.nodes {
                let _ = writeln!(
                    out,
                    "  {:>4} {:<12} : {}",
                    n,
                    self.graph.node(n).label(),
                    self.types.show(t)
                );
            }
        }
        out
    }
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new(CodeGenConfig::default())
    }
}

impl std::fmt::Debug for CodeGen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGen")
            .field("phase", &self.phase)
            .field("nodes", &self.graph.len())
            .field("types", &self.types.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::Op;
    use crate::testing::{entry, finish, init_logger};
    use std::rc::Rc;

    /// `while (arg < 10) arg = arg + 1; return arg;`, built by hand.
    fn counting_loop(config: CodeGenConfig) -> CodeGen {
        let mut code = CodeGen::new(config);
        let CodeGen { graph: g, types: t, .. } = &mut code;
        let int = t.int_bot;
        let (ctrl, mem, arg) = entry(g, t);
        let head = g.new_node(t, Op::Loop, &[None, Some(ctrl), None]);
        g.keep(head);
        let phi = g.new_node(
            t,
            Op::Phi {
                label: Rc::from("arg"),
                min: int,
            },
            &[Some(head), Some(arg), None],
        );
        g.keep(phi);
        let ten = t.int_con(10);
        let c10 = g.con(t, ten);
        let lt = g.new_node(t, Op::Lt, &[None, Some(phi), Some(c10)]);
        let (body, exit) = crate::testing::branch(g, t, head, lt);
        g.keep(exit);
        let one = t.one;
        let c1 = g.con(t, one);
        let add = g.new_node(t, Op::Add, &[None, Some(phi), Some(c1)]);
        g.set_def(phi, 2, Some(add));
        g.set_def(head, 2, Some(body));
        g.unkeep(head);
        g.unkeep(phi);
        g.unkeep(exit);
        finish(g, t, exit, mem, phi);
        code.finish_parse();
        code
    }

    #[test]
    fn test_driver_runs_every_phase() {
        init_logger();
        let mut code = counting_loop(CodeGenConfig::default());
        code.driver(Phase::LocalSched).unwrap();
        assert_eq!(code.phase(), Some(Phase::LocalSched));
        assert_eq!(code.print(), "return Phi(Loop,arg,(Phi_arg+1));");

        let blocks = code.blocks();
        assert!(matches!(code.graph.op(blocks[0].head), Op::Start { .. }));
        assert!(blocks.iter().any(|b| b.loop_depth == 1));
        let header = blocks
            .iter()
            .find(|b| matches!(code.graph.op(b.head), Op::Loop))
            .unwrap();
        // The header's Phi comes right after the Loop itself.
        assert!(matches!(code.graph.op(header.nodes[1].0), Op::Phi { .. }));
        assert_eq!(code.loop_depth(header.head), 1);
        assert!(code.idom(header.head).is_some());
        assert!(code.print_schedule().contains("depth=1"));
    }

    #[test]
    fn test_driver_is_idempotent() {
        let mut code = counting_loop(CodeGenConfig::default());
        code.driver(Phase::Gcm).unwrap();
        code.driver(Phase::Opto).unwrap();
        assert_eq!(code.phase(), Some(Phase::Gcm));
        code.driver(Phase::LocalSched).unwrap();
        assert_eq!(code.phase(), Some(Phase::LocalSched));
    }

    #[test]
    fn test_minimal_config_reaches_same_program() {
        let mut lazy = counting_loop(CodeGenConfig::minimal());
        lazy.driver(Phase::Opto).unwrap();
        let mut eager = counting_loop(CodeGenConfig::full());
        eager.driver(Phase::Opto).unwrap();
        assert_eq!(lazy.print(), eager.print());
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_out_of_order_phase_panics() {
        let mut code = counting_loop(CodeGenConfig::default());
        code.gcm();
    }
}
