//! Local rewrite rules.
//!
//! `idealize` either returns `None` (no rewrite applies), `Some(n)` after
//! editing `n` in place, or `Some(m)` for a different node that should
//! replace `n`. Replacement nodes built here are already peepholed.

use super::graph::Graph;
use super::node::{NodeId, Op};
use crate::types::Types;
use rustc_hash::FxHashMap;

impl Graph {
    pub(crate) fn idealize(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        match self.op(n).clone() {
            Op::Add => self.idealize_add(types, n),
            Op::Sub => self.idealize_sub(types, n),
            Op::Mul => {
                if self.con_int(types, self.input(n, 2)?) == Some(1) {
                    return self.input(n, 1);
                }
                self.constant_right(types, n)
            }
            Op::Div => {
                if self.con_int(types, self.input(n, 2)?) == Some(1) {
                    return self.input(n, 1);
                }
                None
            }
            Op::And | Op::Or | Op::Xor => self.idealize_bitwise(types, n),
            Op::Shl | Op::Sar | Op::Shr => {
                if self.con_int(types, self.input(n, 2)?) == Some(0) {
                    return self.input(n, 1);
                }
                None
            }
            Op::AddF | Op::MulF => self.constant_right(types, n),
            Op::Eq | Op::EqF => self.constant_right(types, n),
            Op::Not => {
                let x = self.input(n, 1)?;
                if !matches!(self.op(x), Op::Not) {
                    return None;
                }
                let inner = self.input(x, 1)?;
                let t = self.ty(inner);
                if types.isa(t, types.bool_ty) {
                    Some(inner)
                } else {
                    None
                }
            }
            Op::Cast(t) => {
                let v = self.input(n, 1)?;
                let vt = self.ty(v);
                if types.isa(vt, t) {
                    Some(v)
                } else {
                    None
                }
            }
            Op::ReadOnly => {
                let v = self.input(n, 1)?;
                let vt = self.ty(v);
                if types.is_high(vt) {
                    None
                } else if !types.is_ptr(vt) || types.is_ro(vt) {
                    Some(v)
                } else {
                    None
                }
            }
            Op::Phi { .. } => self.idealize_phi(types, n),
            Op::Region | Op::Loop => self.idealize_region(types, n),
            Op::If => self.idealize_if(types, n),
            Op::CProj { idx, .. } => {
                let iff = self.input(n, 0)?;
                if !matches!(self.op(iff), Op::If) {
                    return None;
                }
                let t = self.ty(iff);
                if (t == types.if_true && idx == 0) || (t == types.if_false && idx == 1) {
                    return self.input(iff, 0);
                }
                None
            }
            Op::Load { .. } => self.idealize_load(types, n),
            Op::Store { alias, .. } => self.idealize_store(n, alias),
            Op::Return => {
                let c = self.input(n, 0)?;
                if self.ty(c) == types.xctrl {
                    Some(c)
                } else {
                    None
                }
            }
            Op::Stop => {
                let before = self.nins(n);
                let mut i = 0;
                while i < self.nins(n) {
                    match self.input(n, i) {
                        Some(r) if self.ty(r) != types.xctrl => i += 1,
                        _ => self.del_def(n, i),
                    }
                }
                if before != self.nins(n) {
                    Some(n)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    fn idealize_add(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let lhs = self.input(n, 1)?;
        let rhs = self.input(n, 2)?;
        let t2 = self.ty(rhs);
        if types.is_high(t2) {
            return None;
        }
        if t2 == types.zero {
            return Some(lhs);
        }
        if lhs == rhs {
            let two = types.int_con(2);
            let two = self.con(types, two);
            return Some(self.add(Op::Mul, &[None, Some(lhs), Some(two)]));
        }
        let lhs_add = matches!(self.op(lhs), Op::Add);
        let rhs_add = matches!(self.op(rhs), Op::Add);
        // Goal: a left spine of adds with constants on the right.
        if !lhs_add && rhs_add {
            return Some(self.swap12(n));
        }
        if matches!(self.op(rhs), Op::Minus) {
            let y = self.input(rhs, 1)?;
            return Some(self.add(Op::Sub, &[None, Some(lhs), Some(y)]));
        }
        // x + (y + z)  =>  (x + y) + z
        if rhs_add {
            let (y, z) = (self.input(rhs, 1)?, self.input(rhs, 2)?);
            let inner = self.new_node(types, Op::Add, &[None, Some(lhs), Some(y)]);
            return Some(self.add(Op::Add, &[None, Some(inner), Some(z)]));
        }
        if !lhs_add {
            return if spline_cmp(self, types, lhs, rhs) {
                Some(self.swap12(n))
            } else {
                None
            };
        }
        // Only (add add non) from here on.
        let (x, c1) = (self.input(lhs, 1)?, self.input(lhs, 2)?);
        if types.is_constant(self.ty(c1)) && types.is_constant(t2) {
            let folded = self.new_node(types, Op::Add, &[None, Some(c1), Some(rhs)]);
            return Some(self.add(Op::Add, &[None, Some(x), Some(folded)]));
        }
        // (x + y) + z  =>  (x + z) + y when z sorts before y.
        if spline_cmp(self, types, c1, rhs) {
            let inner = self.new_node(types, Op::Add, &[None, Some(x), Some(rhs)]);
            return Some(self.add(Op::Add, &[None, Some(inner), Some(c1)]));
        }
        None
    }

    fn idealize_sub(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let lhs = self.input(n, 1)?;
        let rhs = self.input(n, 2)?;
        if lhs == rhs {
            let zero = types.zero;
            return Some(self.con(types, zero));
        }
        if let Some(c) = self.con_int(types, rhs) {
            let neg = types.int_con(c.wrapping_neg());
            let neg = self.con(types, neg);
            return Some(self.add(Op::Add, &[None, Some(lhs), Some(neg)]));
        }
        if matches!(self.op(rhs), Op::Minus) {
            let y = self.input(rhs, 1)?;
            return Some(self.add(Op::Add, &[None, Some(lhs), Some(y)]));
        }
        None
    }

    fn idealize_bitwise(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let op = self.op(n).clone();
        let lhs = self.input(n, 1)?;
        let rhs = self.input(n, 2)?;
        if lhs == rhs {
            if op == Op::Xor {
                let zero = types.zero;
                return Some(self.con(types, zero));
            }
            return Some(lhs);
        }
        match (op, self.con_int(types, rhs)) {
            (Op::And, Some(-1)) | (Op::Or | Op::Xor, Some(0)) => Some(lhs),
            (Op::And, Some(0)) => Some(rhs),
            _ => self.constant_right(types, n),
        }
    }

    /// Commutative ops keep a constant operand in slot 2.
    fn constant_right(&mut self, types: &Types, n: NodeId) -> Option<NodeId> {
        let lhs = self.input(n, 1)?;
        let rhs = self.input(n, 2)?;
        if types.is_constant(self.ty(lhs)) && !types.is_constant(self.ty(rhs)) {
            return Some(self.swap12(n));
        }
        None
    }

    // =========================================================================
    // Merges
    // =========================================================================

    fn idealize_phi(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let r = self.input(n, 0)?;
        if !self.op(r).is_region() {
            // Region collapsed into its single predecessor.
            return if self.ty(r) == types.xctrl {
                None
            } else {
                self.input(n, 1)
            };
        }
        if self.is_in_progress(r) {
            return None;
        }

        if let Some(live) = self.single_unique_input(types, n, r) {
            let (lt, pt) = (self.ty(live), self.ty(n));
            if types.isa(lt, pt) {
                return Some(live);
            }
            return Some(self.add(Op::Cast(pt), &[None, Some(live)]));
        }

        // Leave it to the region to fold a dead path first.
        for i in 1..self.nins(r) {
            if self.input(r, i).is_some_and(|p| self.ty(p) == types.xctrl) {
                return None;
            }
        }

        // Phi(N, Cast(N), ..)  =>  N
        if let Some(base) = self.cast_base(n) {
            return Some(base);
        }

        if !matches!(self.op(r), Op::Loop) {
            if let Some(m) = self.drop_same_op(types, n) {
                return Some(m);
            }
        }
        None
    }

    /// The one input reaching this Phi along live paths, ignoring self-loops.
    fn single_unique_input(&mut self, types: &Types, n: NodeId, r: NodeId) -> Option<NodeId> {
        if matches!(self.op(r), Op::Loop)
            && self.input(r, 1).is_some_and(|e| self.ty(e) == types.xctrl)
        {
            return None;
        }
        let mut live = None;
        for i in 1..self.nins(n) {
            let Some(p) = self.input(r, i) else { continue };
            self.add_dep(p, n);
            if self.ty(p) == types.xctrl {
                continue;
            }
            let v = self.input(n, i)?;
            if v == n {
                continue;
            }
            match live {
                None => live = Some(v),
                Some(l) if l == v => {}
                Some(_) => return None,
            }
        }
        live
    }

    /// The common value if every input is either `N` or a Cast of `N`.
    fn cast_base(&self, n: NodeId) -> Option<NodeId> {
        let strip = |x: NodeId| match self.op(x) {
            Op::Cast(_) => self.input(x, 1).unwrap_or(x),
            _ => x,
        };
        let mut base = None;
        let mut saw_cast = false;
        for i in 1..self.nins(n) {
            let v = self.input(n, i)?;
            saw_cast |= matches!(self.op(v), Op::Cast(_));
            let b = strip(v);
            match base {
                None => base = Some(b),
                Some(x) if x == b => {}
                Some(_) => return None,
            }
        }
        if saw_cast {
            base
        } else {
            None
        }
    }

    /// Phi(op(a, b), op(c, d))  =>  op(Phi(a, c), Phi(b, d))
    fn drop_same_op(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let first = self.input(n, 1)?;
        let op = self.op(first).clone();
        if !(op.is_int_binop() || op.is_float_binop() || op.is_compare()) {
            return None;
        }
        let mut lhss = vec![self.input(n, 0)];
        let mut rhss = vec![self.input(n, 0)];
        for i in 1..self.nins(n) {
            let v = self.input(n, i)?;
            if *self.op(v) != op || v == n || self.input(v, 0).is_some() {
                return None;
            }
            lhss.push(Some(self.input(v, 1)?));
            rhss.push(Some(self.input(v, 2)?));
        }
        let Op::Phi { label, .. } = self.op(n).clone() else {
            return None;
        };
        let lmin = lhss[1].map_or(types.bottom, |x| self.ty(x));
        let rmin = rhss[1].map_or(types.bottom, |x| self.ty(x));
        let lmin = types.glb(lmin);
        let rmin = types.glb(rmin);
        let lphi = self.new_node(
            types,
            Op::Phi {
                label: label.clone(),
                min: lmin,
            },
            &lhss,
        );
        self.keep(lphi);
        let rphi = self.new_node(types, Op::Phi { label, min: rmin }, &rhss);
        self.unkeep(lphi);
        Some(self.add(op, &[None, Some(lphi), Some(rphi)]))
    }

    fn idealize_region(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        if self.is_in_progress(n) {
            return None;
        }
        let is_loop = matches!(self.op(n), Op::Loop);
        let dead = (1..self.nins(n))
            .find(|&i| self.input(n, i).is_some_and(|p| self.ty(p) == types.xctrl));
        if let Some(path) = dead {
            // The entry of a loop is never removed; the loop dies with it.
            if !(is_loop && path == 1) {
                // A Phi deleting its input may delete itself, so gather first.
                let phis: Vec<NodeId> = self
                    .uses(n)
                    .iter()
                    .copied()
                    .filter(|&u| matches!(self.op(u), Op::Phi { .. }) && self.input(u, 0) == Some(n))
                    .collect();
                for phi in phis {
                    if !self.is_dead(phi) && path < self.nins(phi) {
                        self.del_def(phi, path);
                        self.push_work(phi);
                    }
                }
                self.del_def(n, path);
                if is_loop {
                    // Without its back edge a loop is a plain merge.
                    self.unlock(n);
                    self.node_mut(n).op = Op::Region;
                }
                if self.nins(n) == 2 && !self.has_phi(n) {
                    return self.input(n, 1);
                }
                return Some(n);
            }
        }
        if self.nins(n) == 2 && !self.has_phi(n) {
            return self.input(n, 1);
        }
        // Empty diamond: both arms of one If meet again with nothing between.
        if self.nins(n) == 3 && !self.has_phi(n) {
            let (c1, c2) = (self.input(n, 1)?, self.input(n, 2)?);
            if matches!(self.op(c1), Op::CProj { .. })
                && matches!(self.op(c2), Op::CProj { .. })
                && self.input(c1, 0) == self.input(c2, 0)
                && self.uses(c1).len() == 1
                && self.uses(c2).len() == 1
            {
                let iff = self.input(c1, 0)?;
                if matches!(self.op(iff), Op::If) {
                    return self.input(iff, 0);
                }
            }
        }
        None
    }

    pub fn has_phi(&self, r: NodeId) -> bool {
        self.uses(r)
            .iter()
            .any(|&u| matches!(self.op(u), Op::Phi { .. }) && self.input(u, 0) == Some(r))
    }

    /// A loop whose back edge is not yet wired.
    pub fn is_in_progress(&self, r: NodeId) -> bool {
        matches!(self.op(r), Op::Loop) && self.nins(r) >= 3 && self.input(r, 2).is_none()
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// A test already decided by a dominating If on the same predicate.
    fn idealize_if(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let pred = self.input(n, 1)?;
        let pt = self.ty(pred);
        if types.is_high(pt) || types.is_constant(pt) {
            return None;
        }
        let mut depth = FxHashMap::default();
        let mut prior = n;
        let mut dom = self.cfg_idom(n, &mut depth);
        while let Some(d) = dom {
            self.add_dep(d, n);
            if matches!(self.op(d), Op::If) && self.input(d, 1) == Some(pred) {
                if let Op::CProj { idx, .. } = *self.op(prior) {
                    let v = if idx == 0 { types.one } else { types.zero };
                    let c = self.con(types, v);
                    self.set_def(n, 1, Some(c));
                    return Some(n);
                }
            }
            prior = d;
            dom = self.cfg_idom(d, &mut depth);
        }
        None
    }

    // =========================================================================
    // Memory
    // =========================================================================

    fn idealize_load(&mut self, types: &mut Types, n: NodeId) -> Option<NodeId> {
        let Op::Load { name, alias, .. } = self.op(n).clone() else {
            return None;
        };
        let mem = self.input(n, 1)?;
        let ptr = self.input(n, 2)?;
        match self.op(mem).clone() {
            Op::Store { alias: sa, .. } => {
                if sa == alias && self.input(mem, 2) == Some(ptr) {
                    return self.input(mem, 3);
                }
                if sa != alias {
                    let prior = self.input(mem, 1)?;
                    self.set_def(n, 1, Some(prior));
                    return Some(n);
                }
                None
            }
            Op::Proj { idx: 0, .. } => {
                let new = self.input(mem, 0)?;
                let Op::New(pty) = *self.op(new) else {
                    return None;
                };
                let own = self
                    .uses(new)
                    .iter()
                    .copied()
                    .find(|&u| matches!(self.op(u), Op::Proj { idx: 1, .. }));
                if own == Some(ptr) {
                    let (i, _) = types.pointee(pty)?.field(&name)?;
                    return self.input(new, 2 + i);
                }
                // A fresh object cannot alias a pointer that existed before it.
                if own.is_some() && !self.derives_from(ptr, new) {
                    let prior = self.input(new, 1)?;
                    self.set_def(n, 1, Some(prior));
                    return Some(n);
                }
                None
            }
            _ => None,
        }
    }

    /// Does `x` flow (through Casts, read-only views and Phis) from allocation `new`?
    fn derives_from(&self, x: NodeId, new: NodeId) -> bool {
        let mut stack = vec![x];
        let mut seen = Vec::new();
        while let Some(v) = stack.pop() {
            if seen.contains(&v) {
                continue;
            }
            seen.push(v);
            match self.op(v) {
                Op::Proj { .. } if self.input(v, 0) == Some(new) => return true,
                Op::Cast(_) | Op::ReadOnly => stack.extend(self.input(v, 1)),
                Op::Phi { .. } => stack.extend(self.node(v).inputs.iter().skip(1).flatten()),
                _ => {}
            }
        }
        false
    }

    fn idealize_store(&mut self, n: NodeId, alias: u32) -> Option<NodeId> {
        let mem = self.input(n, 1)?;
        let Op::Store { alias: prior_alias, .. } = *self.op(mem) else {
            return None;
        };
        if prior_alias == alias
            && self.input(mem, 2) == self.input(n, 2)
            && self.uses(mem).len() == 1
            && self.uses(mem)[0] == n
        {
            let before = self.input(mem, 1)?;
            self.set_def(n, 1, Some(before));
            return Some(n);
        }
        None
    }

    /// Integer value of a constant node.
    pub(crate) fn con_int(&self, types: &Types, n: NodeId) -> Option<i64> {
        match self.op(n) {
            Op::Con(t) => types.int_value(*t),
            _ => None,
        }
    }
}

/// Should `hi` sort after `lo` along an add spine? Constants go last.
fn spline_cmp(g: &Graph, types: &Types, hi: NodeId, lo: NodeId) -> bool {
    if types.is_constant(g.ty(lo)) {
        return false;
    }
    if types.is_constant(g.ty(hi)) {
        return true;
    }
    lo.index() > hi.index()
}
