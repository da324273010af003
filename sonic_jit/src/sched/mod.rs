//! Scheduling: from a floating graph to ordered basic blocks.
//!
//! - **CFG** (`cfg.rs`): blocks, edges and dominators over control nodes
//! - **Loops** (`loops.rs`): natural loops and per-block loop depth
//! - **GCM** (`gcm.rs`): home block for every floating node
//! - **Local** (`local.rs`): node order inside each block

pub mod cfg;
pub mod gcm;
pub mod local;
pub mod loops;

pub use cfg::{BasicBlock, BlockId, Cfg, DominatorTree};
pub use gcm::{global_code_motion, Placement};
pub use local::local_schedule;
pub use loops::{Loop, LoopTree};

use crate::ir::graph::Graph;

/// Rebuild block edges from the scheduled node lists alone and check that
/// dominance comes out the same.
pub fn check_round_trip(graph: &Graph, cfg: &Cfg, dom: &DominatorTree) -> Result<(), String> {
    let again = cfg.rederive(graph);
    let dom2 = DominatorTree::build(&again);
    for (b, bb) in cfg.iter() {
        if dom.idom(b) != dom2.idom(b) {
            return Err(format!(
                "block {b} ({}) idom {:?} became {:?}",
                graph.op(bb.head).name(),
                dom.idom(b),
                dom2.idom(b)
            ));
        }
    }
    Ok(())
}
