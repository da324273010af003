//! Graph-building helpers shared by unit tests.

use crate::ir::graph::Graph;
use crate::ir::node::{NodeId, Op};
use crate::types::Types;
use std::rc::Rc;

/// Project control, memory and `arg` out of Start.
pub(crate) fn entry(g: &mut Graph, t: &mut Types) -> (NodeId, NodeId, NodeId) {
    let start = g.start;
    let ctrl = g.new_node(
        t,
        Op::CProj {
            idx: 0,
            label: Rc::from("$ctrl"),
        },
        &[Some(start)],
    );
    let mem = g.new_node(
        t,
        Op::Proj {
            idx: 1,
            label: Rc::from("$mem"),
        },
        &[Some(start)],
    );
    let arg = g.new_node(
        t,
        Op::Proj {
            idx: 2,
            label: Rc::from("arg"),
        },
        &[Some(start)],
    );
    (ctrl, mem, arg)
}

/// Return `val` and hook the Return to Stop.
pub(crate) fn finish(
    g: &mut Graph,
    t: &mut Types,
    ctrl: NodeId,
    mem: NodeId,
    val: NodeId,
) -> NodeId {
    let ret = g.new_node(t, Op::Return, &[Some(ctrl), Some(mem), Some(val)]);
    let stop = g.stop;
    g.add_def(stop, Some(ret));
    ret
}

/// `if (pred)` at `ctrl`; returns the true and false projections.
pub(crate) fn branch(
    g: &mut Graph,
    t: &mut Types,
    ctrl: NodeId,
    pred: NodeId,
) -> (NodeId, NodeId) {
    let iff = g.new_node(t, Op::If, &[Some(ctrl), Some(pred)]);
    g.keep(iff);
    let tru = g.new_node(
        t,
        Op::CProj {
            idx: 0,
            label: Rc::from("True"),
        },
        &[Some(iff)],
    );
    g.keep(tru);
    let fal = g.new_node(
        t,
        Op::CProj {
            idx: 1,
            label: Rc::from("False"),
        },
        &[Some(iff)],
    );
    g.unkeep(tru);
    g.unkeep(iff);
    (tru, fal)
}

/// Route `log` output through the test harness; safe to call repeatedly.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
