//! Expression-style graph printer.
//!
//! Renders the graph reachable from Stop as `return <expr>;` statements,
//! expanding each value as an expression tree. A Phi already being
//! printed is referred to by its label, so loops print finitely:
//! `return Phi(Loop,arg,(Phi_arg+1));`.

use super::arena::BitSet;
use super::graph::Graph;
use super::node::{NodeId, Op};
use crate::types::Types;
use std::fmt::Write;

impl Graph {
    /// Print the program as its return statements.
    pub fn print(&self, types: &Types) -> String {
        let mut p = Printer {
            graph: self,
            types,
            visited: BitSet::new(),
            out: String::new(),
        };
        p.stop();
        p.out
    }

    /// Print one value as an expression.
    pub fn print_expr(&self, types: &Types, n: NodeId) -> String {
        let mut p = Printer {
            graph: self,
            types,
            visited: BitSet::new(),
            out: String::new(),
        };
        p.node(Some(n));
        p.out
    }
}

struct Printer<'a> {
    graph: &'a Graph,
    types: &'a Types,
    visited: BitSet,
    out: String,
}

impl Printer<'_> {
    fn stop(&mut self) {
        let stop = self.graph.stop;
        let rets: Vec<NodeId> = self.graph.node(stop).inputs.iter().flatten().copied().collect();
        if rets.len() == 1 {
            self.node(Some(rets[0]));
            return;
        }
        self.out.push_str("Stop[ ");
        for r in rets {
            self.node(Some(r));
            self.out.push(' ');
        }
        self.out.push(']');
    }

    fn node(&mut self, n: Option<NodeId>) {
        let Some(n) = n else {
            self.out.push_str("___");
            return;
        };
        let g = self.graph;
        let node = g.node(n);
        match &node.op {
            Op::Return => {
                self.out.push_str("return ");
                self.node(node.input(2));
                self.out.push(';');
            }
            Op::Con(t) => {
                let _ = write!(self.out, "{}", self.types.show(*t));
            }
            Op::Phi { .. } => {
                if !self.visited.insert(n.as_usize()) {
                    self.out.push_str(&node.label());
                    return;
                }
                self.out.push_str("Phi(");
                for (i, x) in node.inputs.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    match x {
                        // The region prints as its kind only.
                        Some(r) if i == 0 => self.out.push_str(g.op(*r).name()),
                        _ => self.node(*x),
                    }
                }
                self.out.push(')');
            }
            Op::Parm { label, .. } => self.out.push_str(label),
            Op::Proj { idx, label } => {
                let parent = node.input(0);
                match parent.map(|p| g.op(p)) {
                    Some(Op::CallEnd) if *idx == 2 => {
                        self.call(parent.and_then(|ce| g.input(ce, 0)));
                    }
                    _ => self.out.push_str(label),
                }
            }
            Op::Minus | Op::MinusF => {
                self.out.push_str("(-");
                self.node(node.input(1));
                self.out.push(')');
            }
            Op::Not => {
                self.out.push_str("(!");
                self.node(node.input(1));
                self.out.push(')');
            }
            Op::ToFloat => {
                self.out.push_str("(flt)");
                self.node(node.input(1));
            }
            Op::Cast(t) => {
                let _ = write!(self.out, "({})", self.types.show(*t));
                self.node(node.input(1));
            }
            Op::ReadOnly => self.node(node.input(1)),
            Op::New(t) => {
                let name = self.types.pointee(*t).map_or("void", |s| &s.name);
                let _ = write!(self.out, "new {name}");
            }
            Op::Load { name, .. } => {
                self.node(node.input(2));
                let _ = write!(self.out, ".{name}");
            }
            Op::Store { name, .. } => {
                self.node(node.input(2));
                let _ = write!(self.out, ".{name}=");
                self.node(node.input(3));
                self.out.push(';');
            }
            op => match op.glyph() {
                Some(glyph) => {
                    self.out.push('(');
                    self.node(node.input(1));
                    self.out.push_str(glyph);
                    self.node(node.input(2));
                    self.out.push(')');
                }
                None => self.out.push_str(&node.label()),
            },
        }
    }

    /// `f(a,b)` for a call whose inputs are `[ctrl, mem, args.., fptr]`.
    fn call(&mut self, call: Option<NodeId>) {
        let Some(call) = call else {
            self.out.push_str("___");
            return;
        };
        let inputs = &self.graph.node(call).inputs;
        let n = inputs.len();
        self.node(inputs.last().copied().flatten());
        self.out.push('(');
        for i in 2..n.saturating_sub(1) {
            if i > 2 {
                self.out.push(',');
            }
            self.node(inputs[i]);
        }
        self.out.push(')');
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::ir::graph::Graph;
    use crate::ir::node::Op;
    use crate::types::Types;
    use std::rc::Rc;

    #[test]
    fn test_print_binary_expression() {
        let mut t = Types::new();
        let arg_ty = t.int_bot;
        let mut g = Graph::new(&mut t, arg_ty);
        let start = g.start;
        let arg = g.add(
            Op::Proj {
                idx: 2,
                label: Rc::from("arg"),
            },
            &[Some(start)],
        );
        let two = t.int_con(2);
        let c = g.add(Op::Con(two), &[Some(start)]);
        let add = g.add(Op::Add, &[None, Some(arg), Some(c)]);
        let neg = g.add(Op::Minus, &[None, Some(add)]);
        assert_eq!(g.print_expr(&t, neg), "(-(arg+2))");
    }

    #[test]
    fn test_print_loop_phi_by_label() {
        let mut t = Types::new();
        let arg_ty = t.int_bot;
        let mut g = Graph::new(&mut t, arg_ty);
        let start = g.start;
        let ctrl = g.add(
            Op::CProj {
                idx: 0,
                label: Rc::from("$ctrl"),
            },
            &[Some(start)],
        );
        let arg = g.add(
            Op::Proj {
                idx: 2,
                label: Rc::from("arg"),
            },
            &[Some(start)],
        );
        let lp = g.add(Op::Loop, &[None, Some(ctrl), None]);
        let phi = g.add(
            Op::Phi {
                label: Rc::from("arg"),
                min: arg_ty,
            },
            &[Some(lp), Some(arg), None],
        );
        let one = t.one;
        let c = g.add(Op::Con(one), &[Some(start)]);
        let inc = g.add(Op::Add, &[None, Some(phi), Some(c)]);
        g.set_def(phi, 2, Some(inc));
        assert_eq!(g.print_expr(&t, phi), "Phi(Loop,arg,(Phi_arg+1))");
    }

    #[test]
    fn test_print_new_and_load() {
        let mut t = Types::new();
        let arg_ty = t.int_bot;
        let mut g = Graph::new(&mut t, arg_ty);
        let s = t.declare_struct("P");
        let int = t.int_bot;
        t.add_field(s, "x", int, false);
        let s = t.close_struct(s).unwrap();
        let ptr = t.ptr(2, s);
        let start = g.start;
        let mem = g.add(
            Op::Proj {
                idx: 1,
                label: Rc::from("$mem"),
            },
            &[Some(start)],
        );
        let new = g.add(Op::New(ptr), &[None, Some(mem)]);
        let p = g.add(
            Op::Proj {
                idx: 1,
                label: Rc::from("P"),
            },
            &[Some(new)],
        );
        let ld = g.add(
            Op::Load {
                name: Rc::from("x"),
                alias: 1,
                decl: int,
            },
            &[None, Some(mem), Some(p)],
        );
        assert_eq!(g.print_expr(&t, new), "new P");
        assert_eq!(g.print_expr(&t, ld), "P.x");
    }
}
