//! The peephole driver: compute, constant-fold, value-number, idealize.
//!
//! [`Graph::peephole_opt`] is one bounded step on one node and is shared by
//! construction-time peepholes and the worklist optimizer. It returns
//! `None` when nothing changed and otherwise the node that now stands for
//! `n` (possibly `n` itself after a type change or in-place rewrite).

use super::graph::Graph;
use super::node::{NodeId, Op};
use crate::types::{TypeId, Types};

impl Graph {
    /// Set the type of `n`, queueing its users when it changes. Returns the
    /// previous type.
    pub fn set_type(&mut self, types: &mut Types, n: NodeId, t: TypeId) -> TypeId {
        let old = self.ty(n);
        if old == t {
            return old;
        }
        if old.is_valid() && !types.isa(t, old) {
            self.stats.monotone_violations += 1;
            log::debug!(
                "non-monotone type on {n} {}: {} -> {}",
                self.op(n).name(),
                types.show(old),
                types.show(t)
            );
        }
        self.node_mut(n).ty = t;
        self.push_uses(n);
        self.move_deps_to_worklist(n);
        old
    }

    /// One peephole step on `n`.
    pub fn peephole_opt(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let t = self.compute(types, n);
        let old = self.set_type(types, n, t);

        // Replace computed constants, unless already a constant.
        if !matches!(self.op(n), Op::Con(_)) && types.is_constant(t) {
            let c = self.add(Op::Con(t), &[Some(self.start)]);
            return Some(self.peephole_opt(types, c).unwrap_or(c));
        }

        if self.op(n).is_gvn() && !self.phi_in_progress(n) {
            if let Some(m) = self.gvn_lookup(n) {
                let joined = types.join(self.ty(m), t);
                self.set_type(types, m, joined);
                return Some(self.dead_code_elim(n, m));
            }
        }

        if let Some(m) = self.idealize(types, n) {
            self.stats.peepholes += 1;
            log::trace!("idealized {n} {} into {m}", self.op(n).name());
            return Some(m);
        }

        if old == t {
            None
        } else {
            Some(n)
        }
    }

    /// Construction-time peephole: repeat until `n` settles, then return
    /// its replacement, killing `n` if nothing holds it.
    pub fn peephole(&mut self, types: &mut Types, n: NodeId) -> NodeId {
        if !self.peephole_on() {
            let t = self.compute(types, n);
            self.set_type(types, n, t);
            return n;
        }
        match self.peephole_opt(types, n) {
            None => n,
            Some(m) => {
                self.keep(m);
                let r = self.peephole(types, m);
                self.unkeep(m);
                let r = self.dead_code_elim(m, r);
                self.dead_code_elim(n, r)
            }
        }
    }

    /// Kill `n` if it was replaced by `m` and nothing else holds it.
    pub fn dead_code_elim(&mut self, n: NodeId, m: NodeId) -> NodeId {
        if m != n && self.is_unused(n) && !self.is_dead(n) {
            self.keep(m);
            self.kill(n);
            self.unkeep(m);
        }
        m
    }

    fn phi_in_progress(&self, n: NodeId) -> bool {
        matches!(self.op(n), Op::Phi { .. })
            && self.input(n, 0).is_some_and(|r| self.is_in_progress(r))
    }

    // =========================================================================
    // Construction Helpers
    // =========================================================================

    /// A peepholed constant node.
    pub fn con(&mut self, types: &mut Types, t: TypeId) -> NodeId {
        let c = self.add(Op::Con(t), &[Some(self.start)]);
        self.peephole(types, c)
    }

    /// Allocate and peephole a node.
    pub fn new_node(&mut self, types: &mut Types, op: Op, inputs: &[Option<NodeId>]) -> NodeId {
        let n = self.add(op, inputs);
        self.peephole(types, n)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::ir::graph::Graph;
    use crate::ir::node::{NodeId, Op};
    use crate::types::Types;
    use std::rc::Rc;

    fn setup() -> (Graph, Types, NodeId) {
        let mut types = Types::new();
        let arg_ty = types.int_bot;
        let mut g = Graph::new(&mut types, arg_ty);
        let start = g.start;
        let arg = g.new_node(
            &mut types,
            Op::Proj {
                idx: 2,
                label: Rc::from("arg"),
            },
            &[Some(start)],
        );
        g.keep(arg);
        (g, types, arg)
    }

    fn int(g: &mut Graph, t: &mut Types, v: i64) -> NodeId {
        let ty = t.int_con(v);
        g.con(t, ty)
    }

    #[test]
    fn test_constant_expression_folds() {
        let (mut g, mut t, _) = setup();
        let two = int(&mut g, &mut t, 2);
        let three = int(&mut g, &mut t, 3);
        let mul = g.new_node(&mut t, Op::Mul, &[None, Some(two), Some(three)]);
        assert_eq!(t.int_value(g.ty(mul)), Some(6));
        assert!(matches!(g.op(mul), Op::Con(_)));
    }

    #[test]
    fn test_constants_are_shared() {
        let (mut g, mut t, _) = setup();
        let a = int(&mut g, &mut t, 7);
        let b = int(&mut g, &mut t, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_add_zero_and_identity() {
        let (mut g, mut t, arg) = setup();
        let zero = int(&mut g, &mut t, 0);
        let n = g.new_node(&mut t, Op::Add, &[None, Some(arg), Some(zero)]);
        assert_eq!(n, arg);
        let sub = g.new_node(&mut t, Op::Sub, &[None, Some(arg), Some(arg)]);
        assert_eq!(t.int_value(g.ty(sub)), Some(0));
    }

    #[test]
    fn test_constant_moves_right_and_gvn_shares() {
        let (mut g, mut t, arg) = setup();
        let one = int(&mut g, &mut t, 1);
        let a = g.new_node(&mut t, Op::Add, &[None, Some(one), Some(arg)]);
        g.keep(a);
        assert_eq!(g.input(a, 1), Some(arg));
        assert_eq!(g.input(a, 2), Some(one));
        let b = g.new_node(&mut t, Op::Add, &[None, Some(arg), Some(one)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_chain_reassociates() {
        // (arg + 1) + 2  =>  arg + 3
        let (mut g, mut t, arg) = setup();
        let one = int(&mut g, &mut t, 1);
        let two = int(&mut g, &mut t, 2);
        let a = g.new_node(&mut t, Op::Add, &[None, Some(arg), Some(one)]);
        g.keep(a);
        let b = g.new_node(&mut t, Op::Add, &[None, Some(a), Some(two)]);
        g.unkeep(a);
        assert!(matches!(g.op(b), Op::Add));
        assert_eq!(g.input(b, 1), Some(arg));
        let c = g.input(b, 2).unwrap();
        assert_eq!(g.con_int(&t, c), Some(3));
    }

    #[test]
    fn test_double_negation_of_bool() {
        let (mut g, mut t, arg) = setup();
        let one = int(&mut g, &mut t, 1);
        let eq = g.new_node(&mut t, Op::Eq, &[None, Some(arg), Some(one)]);
        g.keep(eq);
        let n1 = g.new_node(&mut t, Op::Not, &[None, Some(eq)]);
        g.keep(n1);
        let n2 = g.new_node(&mut t, Op::Not, &[None, Some(n1)]);
        assert_eq!(n2, eq);
    }
}
