//! Lattice operations: `meet`, `dual`, `join` and `isa`.
//!
//! `meet` is the greatest lower bound; it is commutative, associative and
//! idempotent, and `Bottom` absorbs everything. `join` is derived through
//! the dual, so it never needs its own case analysis.

use super::{TypeData, TypeId, Types};

impl Types {
    /// Greatest lower bound of two types.
    pub fn meet(&mut self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        let (ka, kb) = (self.data(a), self.data(b));
        match (ka, kb) {
            (TypeData::Top, _) => return b,
            (_, TypeData::Top) => return a,
            (TypeData::Bottom, _) | (_, TypeData::Bottom) => return self.bottom,
            _ => {}
        }
        if let Some(&m) = self.meet_memo.get(&(a, b)) {
            return m;
        }
        let m = self.xmeet(a, b);
        self.meet_memo.insert((a, b), m);
        self.meet_memo.insert((b, a), m);
        m
    }

    /// Meet of two types that are neither equal nor Top/Bottom.
    fn xmeet(&mut self, a: TypeId, b: TypeId) -> TypeId {
        match (self.data(a).clone(), self.data(b).clone()) {
            (TypeData::Ctrl | TypeData::XCtrl, TypeData::Ctrl | TypeData::XCtrl) => self.ctrl,

            (TypeData::Int { min: a0, max: a1 }, TypeData::Int { min: b0, max: b1 }) => {
                self.int(a0.min(b0), a1.max(b1))
            }

            (TypeData::Float { sz: asz, bits: ab }, TypeData::Float { sz: bsz, bits: bb }) => {
                self.meet_float((asz, ab), (bsz, bb))
            }

            (TypeData::Mem { alias: aa, contents: ac }, TypeData::Mem { alias: ba, contents: bc }) => {
                if a == self.mem_top {
                    b
                } else if b == self.mem_top {
                    a
                } else if aa == ba {
                    let c = self.meet(ac, bc);
                    self.mem(aa, c)
                } else {
                    self.mem_bot
                }
            }

            (TypeData::Ptr { nil: an, obj: ao }, TypeData::Ptr { nil: bn, obj: bo }) => {
                let obj = self.meet(ao, bo);
                self.ptr(an.max(bn), obj)
            }

            (
                TypeData::FunPtr {
                    sig: asig,
                    fidxs: af,
                    high: ah,
                },
                TypeData::FunPtr {
                    sig: bsig,
                    fidxs: bf,
                    high: bh,
                },
            ) => {
                let sig = self.meet(asig, bsig);
                let (fidxs, high) = match (ah, bh) {
                    (false, false) => (af | bf, false),
                    (true, true) => (af & bf, true),
                    (true, false) => (bf, false),
                    (false, true) => (af, false),
                };
                self.intern(TypeData::FunPtr { sig, fidxs, high })
            }

            (TypeData::Tuple(xs), TypeData::Tuple(ys)) => {
                if xs.len() != ys.len() {
                    return self.bottom;
                }
                let ts: Vec<TypeId> = xs
                    .iter()
                    .zip(ys.iter())
                    .map(|(&x, &y)| self.meet(x, y))
                    .collect();
                self.tuple(&ts)
            }

            (TypeData::Struct(_), TypeData::Struct(_)) => self.meet_struct(a, b),

            _ => self.bottom,
        }
    }

    /// Float sizes run -64 (top), -32, 0 (constant), 32, 64 (bottom).
    fn meet_float(&mut self, a: (i8, u64), b: (i8, u64)) -> TypeId {
        let fits_f32 = |(sz, bits): (i8, u64)| {
            let v = f64::from_bits(bits);
            sz == 0 && (v as f32) as f64 == v
        };
        // Larger size in `hi`, smaller in `lo`.
        let (hi, lo) = if a.0 < b.0 { (b, a) } else { (a, b) };
        match (hi.0, lo.0) {
            (64, _) => self.f64_ty,
            (0, 0) => {
                if fits_f32(hi) && fits_f32(lo) {
                    self.f32_ty
                } else {
                    self.f64_ty
                }
            }
            (32, 0) if !fits_f32(lo) => self.f64_ty,
            (32, _) => self.f32_ty,
            (-32, -64) => self.intern(TypeData::Float { sz: -32, bits: 0 }),
            (0, -32) if !fits_f32(hi) => self.f64_ty,
            _ => self.intern(TypeData::Float { sz: hi.0, bits: hi.1 }),
        }
    }

    /// Mirror a type across the lattice center.
    pub fn dual(&mut self, t: TypeId) -> TypeId {
        let d = self.duals[t];
        if d.is_valid() {
            return d;
        }
        let d = match self.data(t).clone() {
            TypeData::Top => self.bottom,
            TypeData::Bottom => self.top,
            TypeData::Ctrl => self.xctrl,
            TypeData::XCtrl => self.ctrl,
            TypeData::Int { min, max } => self.int(max, min),
            TypeData::Float { sz, bits } => self.intern(TypeData::Float { sz: -sz, bits }),
            TypeData::Mem { alias, contents } => {
                let c = self.dual(contents);
                self.mem(alias, c)
            }
            TypeData::Ptr { nil, obj } => {
                let o = self.dual(obj);
                self.ptr(3 - nil, o)
            }
            TypeData::FunPtr { sig, fidxs, high } => {
                let sig = self.dual(sig);
                self.intern(TypeData::FunPtr {
                    sig,
                    fidxs,
                    high: !high,
                })
            }
            TypeData::Tuple(ts) => {
                let ds: Vec<TypeId> = ts.iter().map(|&x| self.dual(x)).collect();
                self.tuple(&ds)
            }
            // Closed struct groups get their duals when installed; an open
            // struct has none yet and mirrors to itself.
            TypeData::Struct(_) => return t,
        };
        self.duals.set(t, d);
        self.duals.set(d, t);
        d
    }

    /// Least upper bound.
    pub fn join(&mut self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        let (da, db) = (self.dual(a), self.dual(b));
        let m = self.meet(da, db);
        self.dual(m)
    }

    /// `a` is a member of `b`, i.e. `meet(a, b) == b`.
    pub fn isa(&mut self, a: TypeId, b: TypeId) -> bool {
        self.meet(a, b) == b
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::types::Types;

    fn samples(t: &mut Types) -> Vec<super::TypeId> {
        let mut v = vec![
            t.top,
            t.bottom,
            t.ctrl,
            t.xctrl,
            t.int_top,
            t.int_bot,
            t.zero,
            t.one,
            t.bool_ty,
            t.f64_ty,
            t.f32_ty,
            t.flt_top,
            t.nil,
            t.xnil,
            t.ptr_void,
            t.ptr_void_nil,
            t.fun_null,
            t.fun_bot,
            t.fun_top,
            t.mem_bot,
            t.mem_top,
            t.if_true,
            t.if_both,
        ];
        v.push(t.int(-3, 7));
        v.push(t.int_con(42));
        v.push(t.float_con(3.14));
        v.push(t.float_con(0.5));

        // `struct C { C? l; }` and `struct S { int x; }` through every view.
        let c = t.declare_struct("C");
        let pc = t.ptr(3, c);
        t.add_field(c, "l", pc, false);
        let c = t.close_struct(c).unwrap_or(c);
        let s = t.declare_struct("S");
        t.add_field(s, "x", t.int_bot, false);
        let s = t.close_struct(s).unwrap_or(s);
        let mut ptrs = vec![t.ptr(2, c), t.ptr(3, c), t.ptr(2, s)];
        for i in 0..ptrs.len() {
            let ro = t.make_ro(ptrs[i]);
            ptrs.push(ro);
        }
        for p in ptrs {
            let d = t.dual(p);
            v.push(p);
            v.push(d);
        }
        v
    }

    #[test]
    fn test_meet_is_commutative_and_idempotent() {
        let mut t = Types::new();
        let s = samples(&mut t);
        for &a in &s {
            assert_eq!(t.meet(a, a), a);
            for &b in &s {
                let ab = t.meet(a, b);
                let ba = t.meet(b, a);
                assert_eq!(ab, ba, "{} vs {}", t.show(a), t.show(b));
            }
        }
    }

    #[test]
    fn test_meet_is_associative() {
        let mut t = Types::new();
        let s = samples(&mut t);
        for &a in &s {
            for &b in &s {
                for &c in &s {
                    let ab = t.meet(a, b);
                    let left = t.meet(ab, c);
                    let bc = t.meet(b, c);
                    let right = t.meet(a, bc);
                    assert_eq!(
                        left,
                        right,
                        "({} ^ {}) ^ {}",
                        t.show(a),
                        t.show(b),
                        t.show(c)
                    );
                }
            }
        }
    }

    #[test]
    fn test_top_and_bottom_are_identities() {
        let mut t = Types::new();
        let s = samples(&mut t);
        for &a in &s {
            assert_eq!(t.meet(a, t.top), a);
            assert_eq!(t.meet(a, t.bottom), t.bottom);
        }
    }

    #[test]
    fn test_dual_is_an_involution() {
        let mut t = Types::new();
        let s = samples(&mut t);
        for &a in &s {
            let d = t.dual(a);
            assert_eq!(t.dual(d), a, "{}", t.show(a));
        }
    }

    #[test]
    fn test_join_is_monotone() {
        let mut t = Types::new();
        let s = samples(&mut t);
        for &a in &s {
            for &b in &s {
                if !t.isa(a, b) {
                    continue;
                }
                for &c in &s {
                    let ac = t.join(a, c);
                    let bc = t.join(b, c);
                    assert!(
                        t.isa(ac, bc),
                        "{} isa {} but not when joined with {}",
                        t.show(a),
                        t.show(b),
                        t.show(c)
                    );
                }
            }
        }
    }

    #[test]
    fn test_join_is_an_upper_bound() {
        let mut t = Types::new();
        let s = samples(&mut t);
        for &a in &s {
            for &b in &s {
                let j = t.join(a, b);
                assert!(t.isa(j, a), "{} v {}", t.show(a), t.show(b));
                assert!(t.isa(j, b), "{} v {}", t.show(a), t.show(b));
            }
        }
    }

    #[test]
    fn test_int_ranges() {
        let mut t = Types::new();
        let three = t.int_con(3);
        let five = t.int_con(5);
        let m = t.meet(three, five);
        assert_eq!(t.int_range(m), Some((3, 5)));

        let a = t.int(0, 10);
        let b = t.int(5, 20);
        let j = t.join(a, b);
        assert_eq!(t.int_range(j), Some((5, 10)));
        assert!(t.isa(three, t.int_bot));
        assert!(!t.isa(t.int_bot, three));
    }

    #[test]
    fn test_float_constants_meet_to_size() {
        let mut t = Types::new();
        let half = t.float_con(0.5);
        let quarter = t.float_con(0.25);
        let pi = t.float_con(3.14);
        assert_eq!(t.meet(half, quarter), t.f32_ty);
        assert_eq!(t.meet(half, pi), t.f64_ty);
        assert_eq!(t.meet(t.flt_top, pi), pi);
    }

    #[test]
    fn test_null_meets_pointer_to_nullable() {
        let mut t = Types::new();
        let m = t.meet(t.nil, t.ptr_void);
        assert_eq!(m, t.ptr_void_nil);
        assert!(t.isa(t.ptr_void, t.ptr_void_nil));
        assert!(t.isa(t.nil, t.ptr_void_nil));
        assert_eq!(t.join(t.ptr_void_nil, t.ptr_void), t.ptr_void);
    }

    #[test]
    fn test_different_kinds_fall_to_bottom() {
        let mut t = Types::new();
        let pi = t.float_con(3.14);
        assert_eq!(t.meet(t.one, pi), t.bottom);
        assert_eq!(t.meet(t.ctrl, t.one), t.bottom);
        assert_eq!(t.meet(t.if_true, t.if_false), t.if_both);
    }
}
