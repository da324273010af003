//! Type transfer functions.
//!
//! `compute` derives a node's type from its inputs' current types. It never
//! looks at the node's own type, except for a Phi that has lost its region.

use super::graph::Graph;
use super::node::{NodeId, Op};
use crate::types::{TypeData, TypeId, Types};

impl Graph {
    /// Type of input `i`, `Top` when the slot is empty or not yet typed.
    pub(crate) fn in_ty(&self, n: NodeId, i: usize, types: &Types) -> TypeId {
        match self.input(n, i) {
            Some(d) if self.ty(d).is_valid() => self.ty(d),
            _ => types.top,
        }
    }

    /// Compute the type of `n` from its inputs.
    pub fn compute(&mut self, types: &mut Types, n: NodeId) -> TypeId {
        let op = self.op(n).clone();
        match op {
            Op::Start { .. } => self.ty(n),
            Op::Stop | Op::Scope => types.bottom,

            Op::Region => {
                let mut t = types.xctrl;
                for i in 1..self.nins(n) {
                    if self.input(n, i).is_some() {
                        let pt = self.in_ty(n, i, types);
                        t = types.meet(t, pt);
                    }
                }
                ctrl_only(types, t)
            }
            Op::Loop => {
                if self.is_in_progress(n) {
                    types.ctrl
                } else {
                    let t = self.in_ty(n, 1, types);
                    ctrl_only(types, t)
                }
            }
            Op::Fun { .. } => types.ctrl,
            Op::If => self.compute_if(types, n),
            Op::CProj { idx, .. } => {
                let t = self.in_ty(n, 0, types);
                let t = types.tuple_at(t, idx as usize);
                ctrl_only(types, t)
            }
            Op::Return => {
                let c = self.in_ty(n, 0, types);
                let m = self.in_ty(n, 1, types);
                let v = self.in_ty(n, 2, types);
                types.tuple(&[c, m, v])
            }
            Op::Call => {
                let t = self.in_ty(n, 0, types);
                ctrl_only(types, t)
            }
            Op::CallEnd => self.compute_call_end(types, n),

            Op::Con(t) => t,
            Op::Proj { idx, .. } => {
                let t = self.in_ty(n, 0, types);
                types.tuple_at(t, idx as usize)
            }
            Op::Phi { min, .. } => self.compute_phi(types, n, min),
            Op::Parm { min, .. } => min,

            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Shl
            | Op::Sar
            | Op::Shr => {
                let a = self.in_ty(n, 1, types);
                let b = self.in_ty(n, 2, types);
                int_binop(types, &op, a, b)
            }
            Op::Minus => {
                let a = self.in_ty(n, 1, types);
                if types.is_high(a) {
                    return types.int_top;
                }
                match types.int_range(a) {
                    Some((min, max)) if min == max => types.int_con(min.wrapping_neg()),
                    Some((min, max)) if min != i64::MIN => types.int(-max, -min),
                    _ => types.int_bot,
                }
            }

            Op::AddF | Op::SubF | Op::MulF | Op::DivF => {
                let a = self.in_ty(n, 1, types);
                let b = self.in_ty(n, 2, types);
                if types.is_high(a) || types.is_high(b) {
                    return types.flt_top;
                }
                match (types.float_value(a), types.float_value(b)) {
                    (Some(x), Some(y)) => {
                        let v = match op {
                            Op::AddF => x + y,
                            Op::SubF => x - y,
                            Op::MulF => x * y,
                            _ => x / y,
                        };
                        types.float_con(v)
                    }
                    _ => types.f64_ty,
                }
            }
            Op::MinusF => {
                let a = self.in_ty(n, 1, types);
                if types.is_high(a) {
                    return types.flt_top;
                }
                match types.float_value(a) {
                    Some(x) => types.float_con(-x),
                    None => types.f64_ty,
                }
            }
            Op::ToFloat => {
                let a = self.in_ty(n, 1, types);
                if types.is_high(a) {
                    return types.flt_top;
                }
                match types.int_value(a) {
                    Some(v) => types.float_con(v as f64),
                    None => types.f64_ty,
                }
            }

            Op::Eq | Op::Lt | Op::Le | Op::EqF | Op::LtF | Op::LeF => {
                let same = self.input(n, 1).is_some() && self.input(n, 1) == self.input(n, 2);
                let a = self.in_ty(n, 1, types);
                let b = self.in_ty(n, 2, types);
                compare(types, &op, a, b, same)
            }
            Op::Not => {
                let a = self.in_ty(n, 1, types);
                if types.is_high(a) {
                    return types.dual(types.bool_ty);
                }
                let v = match *types.data(a) {
                    TypeData::Int { min, max } if min == max => Some(min == 0),
                    TypeData::Int { min, max } if min > 0 || max < 0 => Some(false),
                    TypeData::Float { sz: 0, bits } => Some(f64::from_bits(bits) == 0.0),
                    TypeData::Ptr { nil, .. } if nil == 2 => Some(false),
                    _ if a == types.nil || a == types.fun_null => Some(true),
                    TypeData::FunPtr { fidxs, high: false, .. } if fidxs & 1 == 0 => Some(false),
                    _ => None,
                };
                match v {
                    Some(b) => types.int_con(i64::from(b)),
                    None => types.bool_ty,
                }
            }

            Op::Cast(t) => {
                let v = self.in_ty(n, 1, types);
                types.join(v, t)
            }
            Op::ReadOnly => {
                let p = self.in_ty(n, 1, types);
                if types.is_ptr(p) {
                    types.make_ro(p)
                } else {
                    p
                }
            }
            Op::New(ptr) => types.tuple(&[types.mem_bot, ptr]),
            Op::Load { decl, .. } => {
                let p = self.in_ty(n, 2, types);
                if p == types.top || p == types.xnil {
                    types.dual(decl)
                } else {
                    decl
                }
            }
            Op::Store { .. } => types.mem_bot,
        }
    }

    fn compute_if(&mut self, types: &mut Types, n: NodeId) -> TypeId {
        let ctrl = self.in_ty(n, 0, types);
        if ctrl != types.ctrl {
            return types.if_neither;
        }
        let pred = self.in_ty(n, 1, types);
        if types.is_high(pred) {
            return types.if_neither;
        }
        match truthiness(types, pred) {
            Some(true) => types.if_true,
            Some(false) => types.if_false,
            None => types.if_both,
        }
    }

    fn compute_call_end(&mut self, types: &mut Types, n: NodeId) -> TypeId {
        let Some(call) = self.input(n, 0) else {
            return types.top;
        };
        if self.ty(call) != types.ctrl {
            return types.tuple(&[types.xctrl, types.mem_top, types.top]);
        }
        let fptr = self
            .node(call)
            .inputs
            .last()
            .copied()
            .flatten()
            .map(|f| self.ty(f))
            .unwrap_or(types.top);
        let ret = if types.is_high(fptr) {
            types.top
        } else {
            types.fun_ret(fptr).unwrap_or(types.bottom)
        };
        types.tuple(&[types.ctrl, types.mem_bot, ret])
    }

    fn compute_phi(&mut self, types: &mut Types, n: NodeId, min: TypeId) -> TypeId {
        let Some(r) = self.input(n, 0) else {
            return self.ty(n);
        };
        if !self.op(r).is_region() {
            // The region collapsed; a dead one takes the Phi with it.
            return if self.ty(r) == types.xctrl {
                types.top
            } else {
                self.ty(n)
            };
        }
        if self.is_in_progress(r) {
            return min;
        }
        let mut t = types.top;
        for i in 1..self.nins(n) {
            let Some(p) = self.input(r, i) else { continue };
            self.add_dep(p, n);
            if self.ty(p) != types.xctrl {
                let vt = self.in_ty(n, i, types);
                t = types.meet(t, vt);
            }
        }
        t
    }
}

/// Narrow to the control sub-lattice.
fn ctrl_only(types: &Types, t: TypeId) -> TypeId {
    if t == types.ctrl || t == types.bottom {
        types.ctrl
    } else {
        types.xctrl
    }
}

/// Whether a value tests true, if that is known from its type.
pub(crate) fn truthiness(types: &Types, t: TypeId) -> Option<bool> {
    match *types.data(t) {
        TypeData::Int { min, max } if min == max => Some(min != 0),
        TypeData::Int { min, max } if min > 0 || max < 0 => Some(true),
        TypeData::Float { sz: 0, bits } => Some(f64::from_bits(bits) != 0.0),
        TypeData::Ptr { nil: 2, .. } => Some(true),
        _ if t == types.nil || t == types.fun_null => Some(false),
        TypeData::FunPtr {
            fidxs, high: false, ..
        } if fidxs & 1 == 0 => Some(true),
        _ => None,
    }
}

fn int_binop(types: &mut Types, op: &Op, a: TypeId, b: TypeId) -> TypeId {
    if types.is_high(a) || types.is_high(b) {
        return types.int_top;
    }
    let (Some((a0, a1)), Some((b0, b1))) = (types.int_range(a), types.int_range(b)) else {
        return types.int_bot;
    };
    if a0 == a1 && b0 == b1 {
        let (x, y) = (a0, b0);
        let v = match op {
            Op::Add => x.wrapping_add(y),
            Op::Sub => x.wrapping_sub(y),
            Op::Mul => x.wrapping_mul(y),
            Op::Div => {
                if y == 0 {
                    0
                } else {
                    x.wrapping_div(y)
                }
            }
            Op::And => x & y,
            Op::Or => x | y,
            Op::Xor => x ^ y,
            Op::Shl => x.wrapping_shl((y & 63) as u32),
            Op::Sar => x.wrapping_shr((y & 63) as u32),
            Op::Shr => ((x as u64).wrapping_shr((y & 63) as u32)) as i64,
            _ => return types.int_bot,
        };
        return types.int_con(v);
    }
    match op {
        Op::Add => match (a0.checked_add(b0), a1.checked_add(b1)) {
            (Some(lo), Some(hi)) => types.int(lo, hi),
            _ => types.int_bot,
        },
        Op::Sub => match (a0.checked_sub(b1), a1.checked_sub(b0)) {
            (Some(lo), Some(hi)) => types.int(lo, hi),
            _ => types.int_bot,
        },
        Op::And => {
            let hi = match (a0 >= 0, b0 >= 0) {
                (true, true) => a1.min(b1),
                (true, false) => a1,
                (false, true) => b1,
                (false, false) => return types.int_bot,
            };
            types.int(0, hi)
        }
        Op::Sar if b0 == b1 => {
            let k = (b0 & 63) as u32;
            types.int(a0 >> k, a1 >> k)
        }
        Op::Shr if b0 == b1 => {
            let k = (b0 & 63) as u32;
            if k == 0 {
                types.int(a0, a1)
            } else if a0 >= 0 {
                types.int(a0 >> k, a1 >> k)
            } else {
                types.int(0, (u64::MAX >> k) as i64)
            }
        }
        _ => types.int_bot,
    }
}

fn compare(types: &mut Types, op: &Op, a: TypeId, b: TypeId, same: bool) -> TypeId {
    if types.is_high(a) || types.is_high(b) {
        return types.dual(types.bool_ty);
    }
    let known = match op {
        Op::Eq | Op::Lt | Op::Le if same => Some(!matches!(op, Op::Lt)),
        Op::Eq | Op::Lt | Op::Le => match (types.int_range(a), types.int_range(b)) {
            (Some((a0, a1)), Some((b0, b1))) => match op {
                Op::Eq if a0 == a1 && b0 == b1 => Some(a0 == b0),
                Op::Eq if a1 < b0 || b1 < a0 => Some(false),
                Op::Lt if a1 < b0 => Some(true),
                Op::Lt if a0 >= b1 => Some(false),
                Op::Le if a1 <= b0 => Some(true),
                Op::Le if a0 > b1 => Some(false),
                _ => None,
            },
            _ if matches!(op, Op::Eq) => ptr_eq(types, a, b),
            _ => None,
        },
        _ => match (types.float_value(a), types.float_value(b)) {
            (Some(x), Some(y)) => Some(match op {
                Op::EqF => x == y,
                Op::LtF => x < y,
                _ => x <= y,
            }),
            _ => None,
        },
    };
    match known {
        Some(v) => types.int_con(i64::from(v)),
        None => types.bool_ty,
    }
}

/// Pointer equality decided by nullness alone.
fn ptr_eq(types: &Types, a: TypeId, b: TypeId) -> Option<bool> {
    let is_nil = |t: TypeId| t == types.nil || t == types.fun_null;
    let not_nil = |t: TypeId| truthiness(types, t) == Some(true);
    if is_nil(a) && is_nil(b) {
        Some(true)
    } else if (is_nil(a) && not_nil(b)) || (is_nil(b) && not_nil(a)) {
        Some(false)
    } else if a == b && types.fun_index(a).is_some() {
        Some(true)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_ranges() {
        let mut t = Types::new();
        let a = t.int(0, 10);
        let b = t.int(5, 5);
        let r = int_binop(&mut t, &Op::Add, a, b);
        assert_eq!(t.int_range(r), Some((5, 15)));
        let big = t.int(0, i64::MAX);
        let r = int_binop(&mut t, &Op::Add, big, b);
        assert_eq!(r, t.int_bot);
    }

    #[test]
    fn test_constant_folding() {
        let mut t = Types::new();
        let six = t.int_con(6);
        let zero = t.zero;
        let two = t.int_con(2);
        let neg = t.int_con(-8);

        let r = int_binop(&mut t, &Op::Div, six, zero);
        assert_eq!(t.int_value(r), Some(0));
        let r = int_binop(&mut t, &Op::Shl, six, two);
        assert_eq!(t.int_value(r), Some(24));
        let r = int_binop(&mut t, &Op::Sar, neg, two);
        assert_eq!(t.int_value(r), Some(-2));
        let r = int_binop(&mut t, &Op::Shr, neg, two);
        assert_eq!(t.int_value(r), Some(((-8i64 as u64) >> 2) as i64));
    }

    #[test]
    fn test_narrowing_shift_pair() {
        let mut t = Types::new();
        let k = t.int_con(56);
        let int = t.int_bot;
        let shl = int_binop(&mut t, &Op::Shl, int, k);
        let sar = int_binop(&mut t, &Op::Sar, shl, k);
        assert_eq!(t.int_range(sar), Some((-128, 127)));
    }

    #[test]
    fn test_mask_is_non_negative() {
        let mut t = Types::new();
        let mask = t.int_con(255);
        let int = t.int_bot;
        let r = int_binop(&mut t, &Op::And, int, mask);
        assert_eq!(t.int_range(r), Some((0, 255)));
    }

    #[test]
    fn test_compares() {
        let mut t = Types::new();
        let a = t.int(0, 3);
        let b = t.int(5, 9);
        assert_eq!(compare(&mut t, &Op::Lt, a, b, false), t.one);
        assert_eq!(compare(&mut t, &Op::Eq, a, b, false), t.zero);
        assert_eq!(compare(&mut t, &Op::Le, b, a, false), t.zero);
        let ib = t.int_bot;
        assert_eq!(compare(&mut t, &Op::Lt, ib, ib, true), t.zero);
        assert_eq!(compare(&mut t, &Op::Eq, ib, ib, false), t.bool_ty);
        let (nil, pv) = (t.nil, t.ptr_void);
        assert_eq!(compare(&mut t, &Op::Eq, nil, pv, false), t.zero);
    }

    #[test]
    fn test_truthiness() {
        let mut t = Types::new();
        assert_eq!(truthiness(&t, t.zero), Some(false));
        let r = t.int(1, 5);
        assert_eq!(truthiness(&t, r), Some(true));
        assert_eq!(truthiness(&t, t.bool_ty), None);
        assert_eq!(truthiness(&t, t.ptr_void), Some(true));
        assert_eq!(truthiness(&t, t.nil), Some(false));
        assert_eq!(truthiness(&t, t.ptr_void_nil), None);
    }
}
