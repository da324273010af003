//! Lexical scopes as graph nodes.
//!
//! A [`Scope`] wraps an `Op::Scope` node whose inputs are the current
//! control, the current memory and one slot per visible variable. Holding
//! values as node inputs keeps them alive while the parser works and lets
//! peephole replacements (`subsume`) update variable bindings for free.
//!
//! Branches duplicate the scope and merge the copies with a Region and
//! Phis. Loops duplicate it with a Phi per slot up front; slots that never
//! change collapse back to their entry value when the loop closes.

use sonic_jit::ir::graph::Graph;
use sonic_jit::{NodeId, Op, TypeId, Types};
use std::rc::Rc;

/// Slot of the control input.
const CTRL: usize = 0;
/// Slot of the memory input.
const MEM: usize = 1;
/// First variable slot.
const VARS: usize = 2;

/// A declared name.
#[derive(Debug, Clone)]
pub(crate) struct Var {
    pub name: Rc<str>,
    /// Declared type; loop Phis report it while the loop is open.
    pub ty: TypeId,
    pub is_final: bool,
}

/// Parser symbol table backed by a Scope node.
#[derive(Debug)]
pub(crate) struct Scope {
    node: NodeId,
    vars: Vec<Var>,
    /// Index into `vars` where each nested block starts.
    lex: Vec<usize>,
}

impl Scope {
    pub fn new(g: &mut Graph, types: &Types) -> Self {
        let node = g.add(Op::Scope, &[None, None]);
        g.node_mut(node).ty = types.bottom;
        g.keep(node);
        Scope {
            node,
            vars: Vec::new(),
            lex: Vec::new(),
        }
    }

    // =========================================================================
    // Control and memory
    // =========================================================================

    pub fn ctrl(&self, g: &Graph) -> NodeId {
        g.input(self.node, CTRL).unwrap_or(g.start)
    }

    pub fn set_ctrl(&self, g: &mut Graph, c: NodeId) -> NodeId {
        g.set_def(self.node, CTRL, Some(c));
        c
    }

    pub fn mem(&self, g: &Graph) -> NodeId {
        g.input(self.node, MEM).unwrap_or(g.start)
    }

    pub fn set_mem(&self, g: &mut Graph, m: NodeId) {
        g.set_def(self.node, MEM, Some(m));
    }

    // =========================================================================
    // Names
    // =========================================================================

    pub fn push(&mut self) {
        self.lex.push(self.vars.len());
    }

    /// Leave the innermost block, dropping its names.
    pub fn pop(&mut self, g: &mut Graph) {
        let start = self.lex.pop().unwrap_or(0);
        while self.vars.len() > start {
            self.vars.pop();
            let last = g.nins(self.node) - 1;
            g.del_def(self.node, last);
        }
    }

    /// Names declared since the innermost `push`, with their values.
    pub fn innermost(&self, g: &Graph) -> Vec<(Var, Option<NodeId>)> {
        let start = self.lex.last().copied().unwrap_or(0);
        (start..self.vars.len())
            .map(|i| (self.vars[i].clone(), g.input(self.node, VARS + i)))
            .collect()
    }

    /// Declare `name` in the innermost block; false if it is already
    /// declared there.
    pub fn define(
        &mut self,
        g: &mut Graph,
        name: &str,
        ty: TypeId,
        is_final: bool,
        val: NodeId,
    ) -> bool {
        let start = self.lex.last().copied().unwrap_or(0);
        if self.vars[start..].iter().any(|v| &*v.name == name) {
            return false;
        }
        self.vars.push(Var {
            name: Rc::from(name),
            ty,
            is_final,
        });
        g.add_def(self.node, Some(val));
        true
    }

    /// Innermost variable called `name`.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.vars.iter().rposition(|v| &*v.name == name)
    }

    pub fn var(&self, idx: usize) -> &Var {
        &self.vars[idx]
    }

    pub fn get(&self, g: &Graph, idx: usize) -> Option<NodeId> {
        g.input(self.node, VARS + idx)
    }

    pub fn update(&self, g: &mut Graph, idx: usize, val: NodeId) {
        g.set_def(self.node, VARS + idx, Some(val));
    }

    /// Number of open blocks.
    pub fn depth(&self) -> usize {
        self.lex.len()
    }

    /// Number of declared names, all blocks included.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    fn label(&self, slot: usize) -> Rc<str> {
        match slot {
            CTRL => Rc::from("$ctrl"),
            MEM => Rc::from("$mem"),
            _ => self.vars[slot - VARS].name.clone(),
        }
    }

    fn declared(&self, types: &Types, slot: usize) -> TypeId {
        match slot {
            MEM => types.mem_bot,
            _ => self.vars[slot - VARS].ty,
        }
    }

    // =========================================================================
    // Branches and loops
    // =========================================================================

    /// Copy this scope. With `loop_head` set, every memory and variable
    /// slot of `self` is first replaced by a Phi on that loop, which the
    /// copy then shares.
    pub fn dup(&mut self, g: &mut Graph, types: &mut Types, loop_head: Option<NodeId>) -> Scope {
        let n = g.nins(self.node);
        if let Some(head) = loop_head {
            for slot in MEM..n {
                let entry = g.input(self.node, slot);
                let (label, min) = (self.label(slot), self.declared(types, slot));
                let phi = g.new_node(types, Op::Phi { label, min }, &[Some(head), entry, None]);
                g.set_def(self.node, slot, Some(phi));
            }
        }
        let inputs: Vec<Option<NodeId>> = g.node(self.node).inputs.to_vec();
        let node = g.add(Op::Scope, &inputs);
        g.node_mut(node).ty = types.bottom;
        g.keep(node);
        Scope {
            node,
            vars: self.vars.clone(),
            lex: self.lex.clone(),
        }
    }

    /// Merge `that` into `self` at a new Region, adding a Phi for every
    /// slot where the two disagree. Consumes `that`.
    pub fn merge(&mut self, g: &mut Graph, types: &mut Types, that: Scope) -> NodeId {
        let (c1, c2) = (self.ctrl(g), that.ctrl(g));
        let r = g.add(Op::Region, &[None, Some(c1), Some(c2)]);
        g.keep(r);
        for slot in MEM..g.nins(self.node) {
            let (a, b) = (g.input(self.node, slot), g.input(that.node, slot));
            if a != b {
                let (label, min) = (self.label(slot), self.declared(types, slot));
                let phi = g.new_node(types, Op::Phi { label, min }, &[Some(r), a, b]);
                g.set_def(self.node, slot, Some(phi));
            }
        }
        that.kill(g);
        g.unkeep(r);
        let r = g.peephole(types, r);
        self.set_ctrl(g, r)
    }

    /// Close the loop `self` heads: wire the back edge from `back`, fill
    /// in the header Phis, and fold the ones that turned out useless.
    /// Consumes `back`; other scopes holding a folded Phi see its
    /// replacement.
    pub fn end_loop(&mut self, g: &mut Graph, types: &mut Types, back: Scope) {
        let head = self.ctrl(g);
        debug_assert!(g.is_in_progress(head), "end_loop on a closed loop");
        let back_ctrl = back.ctrl(g);
        g.set_def(head, 2, Some(back_ctrl));
        for slot in MEM..g.nins(self.node) {
            let Some(phi) = g.input(self.node, slot) else {
                continue;
            };
            if !matches!(g.op(phi), Op::Phi { .. }) || g.input(phi, 0) != Some(head) {
                continue;
            }
            let v = g.input(back.node, slot);
            g.set_def(phi, 2, v);
            let folded = g.peephole(types, phi);
            if folded != phi && !g.is_dead(phi) {
                g.subsume(phi, folded);
            }
        }
        back.kill(g);
    }

    /// Refine the predicate's operand on one side of an If: a pointer tested
    /// directly is not null on the taken side, and a value tested with `!`
    /// is zero there.
    pub fn upcast(
        &mut self,
        g: &mut Graph,
        types: &mut Types,
        ctrl: NodeId,
        pred: NodeId,
        invert: bool,
    ) {
        if g.ty(ctrl) == types.xctrl {
            return;
        }
        let mut made = None;
        let pred = if invert {
            match g.op(pred) {
                Op::Not => match g.input(pred, 1) {
                    Some(x) => x,
                    None => return,
                },
                _ => {
                    let not = g.new_node(types, Op::Not, &[None, Some(pred)]);
                    made = Some(not);
                    not
                }
            }
        } else {
            pred
        };

        if self.holds(g, pred) {
            let pt = g.ty(pred);
            if let Some((nil, _)) = types.ptr_parts(pt) {
                if nil == 3 {
                    let not_nil = types.with_nil(pt, 2);
                    let cast = g.new_node(types, Op::Cast(not_nil), &[Some(ctrl), Some(pred)]);
                    self.replace(g, pred, cast);
                }
            }
        } else if matches!(g.op(pred), Op::Not) {
            if let Some(x) = g.input(pred, 1).filter(|&x| self.holds(g, x)) {
                let xt = g.ty(x);
                let zero = types.make_zero(xt);
                if zero != types.top && !types.isa(xt, zero) {
                    let c = g.con(types, zero);
                    self.replace(g, x, c);
                }
            }
        }

        if let Some(not) = made {
            if g.is_unused(not) {
                g.kill(not);
            }
        }
    }

    fn holds(&self, g: &Graph, n: NodeId) -> bool {
        g.node(self.node).inputs.iter().skip(VARS).any(|&x| x == Some(n))
    }

    fn replace(&self, g: &mut Graph, old: NodeId, new: NodeId) {
        for slot in VARS..g.nins(self.node) {
            if g.input(self.node, slot) == Some(old) {
                g.set_def(self.node, slot, Some(new));
            }
        }
    }

    /// Release the Scope node and everything only it kept alive.
    pub fn kill(self, g: &mut Graph) {
        g.unkeep(self.node);
        if g.is_unused(self.node) {
            g.kill(self.node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Graph, Types, Scope) {
        let mut t = Types::new();
        let int = t.int_bot;
        let mut g = Graph::new(&mut t, int);
        let start = g.start;
        let scope = Scope::new(&mut g, &t);
        let ctrl = g.new_node(
            &mut t,
            Op::CProj {
                idx: 0,
                label: Rc::from("$ctrl"),
            },
            &[Some(start)],
        );
        scope.set_ctrl(&mut g, ctrl);
        let mem = g.new_node(
            &mut t,
            Op::Proj {
                idx: 1,
                label: Rc::from("$mem"),
            },
            &[Some(start)],
        );
        scope.set_mem(&mut g, mem);
        (g, t, scope)
    }

    #[test]
    fn test_define_and_shadow() {
        let (mut g, mut t, mut s) = setup();
        let one = t.one;
        let c1 = g.con(&mut t, one);
        let int = t.int_bot;
        s.push();
        assert!(s.define(&mut g, "a", int, false, c1));
        assert!(!s.define(&mut g, "a", int, false, c1));
        s.push();
        let zero = t.zero;
        let c0 = g.con(&mut t, zero);
        assert!(s.define(&mut g, "a", int, false, c0));
        let idx = s.lookup("a").unwrap();
        assert_eq!(s.get(&g, idx), Some(c0));
        s.pop(&mut g);
        let idx = s.lookup("a").unwrap();
        assert_eq!(s.get(&g, idx), Some(c1));
        assert_eq!(s.len(), 1);
        assert!(s.lookup("b").is_none());
    }

    #[test]
    fn test_merge_adds_phi_only_where_values_differ() {
        let (mut g, mut t, mut s) = setup();
        g.set_peephole(false);
        let int = t.int_bot;
        let (one, two) = (t.one, t.int_con(2));
        let c1 = g.con(&mut t, one);
        let c2 = g.con(&mut t, two);
        s.push();
        s.define(&mut g, "a", int, false, c1);
        s.define(&mut g, "b", int, false, c1);
        let other = s.dup(&mut g, &mut t, None);
        other.update(&mut g, 0, c2);
        let r = s.merge(&mut g, &mut t, other);
        assert!(matches!(g.op(r), Op::Region));
        let a = s.get(&g, 0).unwrap();
        assert!(matches!(g.op(a), Op::Phi { .. }));
        assert_eq!(g.input(a, 0), Some(r));
        assert_eq!(s.get(&g, 1), Some(c1));
    }

    #[test]
    fn test_unchanged_loop_phis_fold_away() {
        let (mut g, mut t, mut s) = setup();
        let int = t.int_bot;
        let one = t.one;
        let c1 = g.con(&mut t, one);
        s.push();
        s.define(&mut g, "a", int, false, c1);
        s.define(&mut g, "b", int, false, c1);
        let entry = s.ctrl(&g);
        let head = g.new_node(&mut t, Op::Loop, &[None, Some(entry), None]);
        s.set_ctrl(&mut g, head);
        let body = s.dup(&mut g, &mut t, Some(head));
        let phi_a = s.get(&g, 0).unwrap();
        assert!(matches!(g.op(phi_a), Op::Phi { .. }));
        // a = a + 1 in the body; b untouched.
        let add = g.new_node(&mut t, Op::Add, &[None, Some(phi_a), Some(c1)]);
        body.update(&mut g, 0, add);
        s.end_loop(&mut g, &mut t, body);
        let a = s.get(&g, 0).unwrap();
        assert_eq!(a, phi_a);
        assert_eq!(g.input(a, 2), Some(add));
        assert_eq!(s.get(&g, 1), Some(c1));
    }
}
