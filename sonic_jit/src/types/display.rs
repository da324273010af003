//! Human-readable type names.
//!
//! The short form names a struct by its name only; the full form expands
//! struct bodies, printing a struct already being expanded by name so that
//! cyclic types terminate.

use super::{TypeData, TypeId, Types};
use rustc_hash::FxHashSet;
use std::fmt::{self, Write};

/// Short display adapter: `int`, `*C?`, `{int -> int}`.
pub struct ShowType<'a> {
    pub types: &'a Types,
    pub ty: TypeId,
}

/// Full display adapter: `*C {*C? l; }`.
pub struct ShowFull<'a> {
    pub types: &'a Types,
    pub ty: TypeId,
}

impl fmt::Display for ShowType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.types.write_type(f, self.ty, None)
    }
}

impl fmt::Display for ShowFull<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut visit = FxHashSet::default();
        self.types.write_type(f, self.ty, Some(&mut visit))
    }
}

impl Types {
    pub fn show(&self, t: TypeId) -> String {
        ShowType { types: self, ty: t }.to_string()
    }

    pub fn show_full(&self, t: TypeId) -> String {
        ShowFull { types: self, ty: t }.to_string()
    }

    /// Writes `t`; `visit` is `Some` for the full form.
    fn write_type<W: Write>(
        &self,
        w: &mut W,
        t: TypeId,
        mut visit: Option<&mut FxHashSet<TypeId>>,
    ) -> fmt::Result {
        if !t.is_valid() {
            return w.write_str("<none>");
        }
        match self.data(t) {
            TypeData::Top => w.write_str("Top"),
            TypeData::Bottom => w.write_str("Bot"),
            TypeData::Ctrl => w.write_str("Ctrl"),
            TypeData::XCtrl => w.write_str("~Ctrl"),
            &TypeData::Int { min, max } => write_int(w, min, max),
            &TypeData::Float { sz, bits } => match sz {
                -64 => w.write_str("~flt"),
                -32 => w.write_str("~f32"),
                32 => w.write_str("f32"),
                64 => w.write_str("flt"),
                _ => write!(w, "{:?}", f64::from_bits(bits)),
            },
            &TypeData::Mem { alias, contents } => {
                if t == self.mem_bot {
                    w.write_str("MEM#BOT")
                } else if t == self.mem_top {
                    w.write_str("MEM#TOP")
                } else {
                    write!(w, "#{alias}:")?;
                    self.write_type(w, contents, visit)
                }
            }
            &TypeData::Ptr { nil, obj } => {
                if t == self.nil {
                    return w.write_str("null");
                }
                if t == self.xnil {
                    return w.write_str("~nil");
                }
                if nil <= 1 {
                    w.write_char('~')?;
                }
                w.write_char('*')?;
                if obj == self.struct_bot || obj == self.struct_top {
                    w.write_str("void")?;
                } else {
                    self.write_type(w, obj, visit)?;
                }
                if nil == 0 || nil == 3 {
                    w.write_char('?')?;
                }
                Ok(())
            }
            &TypeData::FunPtr { sig, fidxs, high } => {
                if t == self.fun_null {
                    return w.write_str("null");
                }
                if high {
                    w.write_char('~')?;
                }
                w.write_char('{')?;
                match self.tuple_elems(sig) {
                    Some(ts) if !ts.is_empty() => {
                        for &a in &ts[1..] {
                            self.write_type(w, a, visit.as_deref_mut())?;
                            w.write_char(' ')?;
                        }
                        w.write_str("-> ")?;
                        self.write_type(w, ts[0], visit.as_deref_mut())?;
                    }
                    _ => w.write_str("fun")?,
                }
                if !high && fidxs.count_ones() == 1 && fidxs != 1 {
                    write!(w, " #{}", fidxs.trailing_zeros())?;
                }
                w.write_char('}')?;
                if !high && fidxs & 1 == 1 && t != self.fun_bot {
                    w.write_char('?')?;
                }
                Ok(())
            }
            TypeData::Tuple(ts) => {
                w.write_char('[')?;
                for (i, &x) in ts.iter().enumerate() {
                    if i > 0 {
                        w.write_str(", ")?;
                    }
                    self.write_type(w, x, visit.as_deref_mut())?;
                }
                w.write_char(']')
            }
            TypeData::Struct(s) => {
                w.write_str(&s.name)?;
                let Some(visit) = visit else {
                    return Ok(());
                };
                if s.name.starts_with('$') || !visit.insert(t) {
                    return Ok(());
                }
                w.write_str(" {")?;
                for fld in &s.fields {
                    self.write_type(w, fld.ty, Some(&mut *visit))?;
                    w.write_char(' ')?;
                    if fld.is_final {
                        w.write_char('!')?;
                    }
                    write!(w, "{}; ", fld.name)?;
                }
                w.write_char('}')
            }
        }
    }
}

fn write_int<W: Write>(w: &mut W, min: i64, max: i64) -> fmt::Result {
    if min == max {
        return write!(w, "{min}");
    }
    let (lo, hi, high) = if min > max {
        (max, min, true)
    } else {
        (min, max, false)
    };
    let name = match (lo, hi) {
        (i64::MIN, i64::MAX) => Some("int"),
        (0, 1) => Some("bool"),
        (-128, 127) => Some("i8"),
        (-32768, 32767) => Some("i16"),
        (-2147483648, 2147483647) => Some("i32"),
        (0, 255) => Some("u8"),
        (0, 65535) => Some("u16"),
        (0, 4294967295) => Some("u32"),
        _ => None,
    };
    if high {
        w.write_char('~')?;
    }
    match name {
        Some(n) => w.write_str(n),
        None => write!(w, "[{lo}-{hi}]"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::types::Types;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scalar_names() {
        let mut t = Types::new();
        assert_eq!(t.show(t.int_bot), "int");
        assert_eq!(t.show(t.int_top), "~int");
        assert_eq!(t.show(t.bool_ty), "bool");
        let i8_ty = t.int(-128, 127);
        assert_eq!(t.show(i8_ty), "i8");
        let seven = t.int_con(7);
        assert_eq!(t.show(seven), "7");
        let r = t.int(3, 9);
        assert_eq!(t.show(r), "[3-9]");
        assert_eq!(t.show(t.flt_top), "~flt");
        assert_eq!(t.show(t.f64_ty), "flt");
        let pi = t.float_con(3.14);
        assert_eq!(t.show(pi), "3.14");
        assert_eq!(t.show(t.if_true), "[Ctrl, ~Ctrl]");
    }

    #[test]
    fn test_pointer_names() {
        let t = Types::new();
        assert_eq!(t.show(t.nil), "null");
        assert_eq!(t.show(t.ptr_void), "*void");
        assert_eq!(t.show(t.ptr_void_nil), "*void?");
    }

    #[test]
    fn test_function_names() {
        let mut t = Types::new();
        let int = t.int_bot;
        let f = t.fun_sig(int, &[int], false);
        assert_eq!(t.show(f), "{int -> int}");
        let fnil = t.with_nil(f, 3);
        assert_eq!(t.show(fnil), "{int -> int}?");
    }

    #[test]
    fn test_cyclic_struct_prints_finitely() {
        let mut t = Types::new();
        let c = t.declare_struct("C");
        let p = t.ptr(3, c);
        t.add_field(c, "l", p, false);
        let c = t.close_struct(c).unwrap_or(c);
        let p = t.ptr(2, c);
        assert_eq!(t.show(p), "*C");
        assert_eq!(t.show_full(p), "*C {*C? l; }");
        let ro = t.make_ro(p);
        assert_eq!(t.show_full(ro), "*C {*C? !l; }");
    }
}
