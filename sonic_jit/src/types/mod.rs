//! The type lattice.
//!
//! Every node carries a [`TypeId`], a handle into the session's [`Types`]
//! table. Types are interned: two structurally equal types always share one
//! handle, so equality is handle equality. The only exception is a struct
//! that is still being built (`open`), which lives in the arena but not in
//! the intern table until its recursive group closes.
//!
//! # Lattice shape
//!
//! ```text
//!                        Top
//!      /      |      |      |       |      |      \
//!    XCtrl  ~int   ~flt   ~mem   ~null  ~fun  tuples/structs ...
//!     |       |      |      |       |      |
//!    Ctrl    int    flt    mem    *S?    fun
//!      \      |      |      |       |      /
//!                       Bottom
//! ```
//!
//! Each kind is its own sub-lattice; meeting two different kinds falls to
//! Bottom. `dual` mirrors the lattice top-to-bottom and is an involution.

mod display;
mod lattice;
mod structs;

pub use display::{ShowFull, ShowType};

use crate::ir::arena::{Arena, Id, SecondaryMap};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Handle to an interned type.
pub type TypeId = Id<TypeData>;

// =============================================================================
// Type Data
// =============================================================================

/// Structural description of one lattice element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    Top,
    Bottom,
    /// Live control.
    Ctrl,
    /// Dead control.
    XCtrl,
    /// Integer range `[min, max]`; above center when `min > max`.
    Int { min: i64, max: i64 },
    /// Float: `sz` is -64/-32 (high), 0 (constant `bits`), 32/64 (low).
    Float { sz: i8, bits: u64 },
    /// A slice of memory; alias 0 is all of memory.
    Mem { alias: u32, contents: TypeId },
    /// Pointer to a struct. `nil`: 0 = high nullable, 1 = high not-nil,
    /// 2 = not-nil, 3 = nullable.
    Ptr { nil: u8, obj: TypeId },
    /// Function pointer: a signature tuple `[ret, args..]` plus a set of
    /// function indices, bit 0 being the null function. A `high` set means
    /// "any one of", the dual of the low "one of all of".
    FunPtr { sig: TypeId, fidxs: u64, high: bool },
    Tuple(Box<[TypeId]>),
    Struct(StructType),
}

/// A named record type. Fields refer to other structs through pointers only,
/// which is what lets a struct refer to itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: Rc<str>,
    pub open: bool,
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Rc<str>,
    pub ty: TypeId,
    /// Memory alias class; unique per declared field.
    pub alias: u32,
    pub is_final: bool,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| &*f.name == name)
    }
}

// =============================================================================
// Type Table
// =============================================================================

/// Owner of all types in one compilation session.
pub struct Types {
    data: Arena<TypeData>,
    duals: SecondaryMap<TypeData, TypeId>,
    interned: FxHashMap<TypeData, TypeId>,
    /// Installed (closed) structs by name, searched when a freshly built
    /// recursive group might duplicate an existing one.
    structs_by_name: FxHashMap<Rc<str>, Vec<TypeId>>,
    meet_memo: FxHashMap<(TypeId, TypeId), TypeId>,
    ro_memo: FxHashMap<TypeId, TypeId>,
    /// Declared structs whose field list is still growing.
    open: Vec<TypeId>,
    /// Closed structs waiting for a forward reference to close.
    pending: Vec<TypeId>,
    next_alias: u32,

    pub top: TypeId,
    pub bottom: TypeId,
    pub ctrl: TypeId,
    pub xctrl: TypeId,
    pub int_top: TypeId,
    pub int_bot: TypeId,
    pub zero: TypeId,
    pub one: TypeId,
    pub bool_ty: TypeId,
    pub flt_top: TypeId,
    pub f64_ty: TypeId,
    pub f32_ty: TypeId,
    pub mem_top: TypeId,
    pub mem_bot: TypeId,
    pub struct_top: TypeId,
    pub struct_bot: TypeId,
    /// The `null` constant.
    pub nil: TypeId,
    pub xnil: TypeId,
    /// `*void`: any non-null struct pointer.
    pub ptr_void: TypeId,
    /// `*void?`: any struct pointer or null.
    pub ptr_void_nil: TypeId,
    pub fun_bot: TypeId,
    pub fun_top: TypeId,
    pub fun_null: TypeId,
    pub if_both: TypeId,
    pub if_neither: TypeId,
    pub if_true: TypeId,
    pub if_false: TypeId,
}

impl Types {
    pub fn new() -> Self {
        let mut t = Types {
            data: Arena::with_capacity(256),
            duals: SecondaryMap::with_capacity(256),
            interned: FxHashMap::default(),
            structs_by_name: FxHashMap::default(),
            meet_memo: FxHashMap::default(),
            ro_memo: FxHashMap::default(),
            open: Vec::new(),
            pending: Vec::new(),
            next_alias: 1,
            top: TypeId::INVALID,
            bottom: TypeId::INVALID,
            ctrl: TypeId::INVALID,
            xctrl: TypeId::INVALID,
            int_top: TypeId::INVALID,
            int_bot: TypeId::INVALID,
            zero: TypeId::INVALID,
            one: TypeId::INVALID,
            bool_ty: TypeId::INVALID,
            flt_top: TypeId::INVALID,
            f64_ty: TypeId::INVALID,
            f32_ty: TypeId::INVALID,
            mem_top: TypeId::INVALID,
            mem_bot: TypeId::INVALID,
            struct_top: TypeId::INVALID,
            struct_bot: TypeId::INVALID,
            nil: TypeId::INVALID,
            xnil: TypeId::INVALID,
            ptr_void: TypeId::INVALID,
            ptr_void_nil: TypeId::INVALID,
            fun_bot: TypeId::INVALID,
            fun_top: TypeId::INVALID,
            fun_null: TypeId::INVALID,
            if_both: TypeId::INVALID,
            if_neither: TypeId::INVALID,
            if_true: TypeId::INVALID,
            if_false: TypeId::INVALID,
        };
        t.top = t.intern(TypeData::Top);
        t.bottom = t.intern(TypeData::Bottom);
        t.ctrl = t.intern(TypeData::Ctrl);
        t.xctrl = t.intern(TypeData::XCtrl);
        t.int_bot = t.int(i64::MIN, i64::MAX);
        t.int_top = t.int(i64::MAX, i64::MIN);
        t.zero = t.int_con(0);
        t.one = t.int_con(1);
        t.bool_ty = t.int(0, 1);
        t.f64_ty = t.intern(TypeData::Float { sz: 64, bits: 0 });
        t.f32_ty = t.intern(TypeData::Float { sz: 32, bits: 0 });
        t.flt_top = t.intern(TypeData::Float { sz: -64, bits: 0 });
        t.mem_bot = t.mem(0, t.bottom);
        t.mem_top = t.mem(0, t.top);

        // The two generic structs are each other's duals.
        t.struct_bot = t.intern(TypeData::Struct(StructType {
            name: Rc::from("$BOT"),
            open: false,
            fields: Vec::new(),
        }));
        t.struct_top = t.intern(TypeData::Struct(StructType {
            name: Rc::from("$TOP"),
            open: false,
            fields: Vec::new(),
        }));
        let (sb, st) = (t.struct_bot, t.struct_top);
        t.duals.set(sb, st);
        t.duals.set(st, sb);

        t.nil = t.ptr(3, t.struct_top);
        t.xnil = t.dual(t.nil);
        t.ptr_void = t.ptr(2, t.struct_bot);
        t.ptr_void_nil = t.ptr(3, t.struct_bot);

        t.fun_bot = t.intern(TypeData::FunPtr {
            sig: t.bottom,
            fidxs: u64::MAX,
            high: false,
        });
        t.fun_top = t.dual(t.fun_bot);
        t.fun_null = t.intern(TypeData::FunPtr {
            sig: t.top,
            fidxs: 1,
            high: false,
        });

        t.if_both = t.tuple(&[t.ctrl, t.ctrl]);
        t.if_neither = t.tuple(&[t.xctrl, t.xctrl]);
        t.if_true = t.tuple(&[t.ctrl, t.xctrl]);
        t.if_false = t.tuple(&[t.xctrl, t.ctrl]);
        t
    }

    // =========================================================================
    // Interning
    // =========================================================================

    /// Hash-cons a fully built type. Duals are filled in lazily by [`Types::dual`].
    pub(crate) fn intern(&mut self, data: TypeData) -> TypeId {
        if let Some(&id) = self.interned.get(&data) {
            return id;
        }
        let id = self.data.alloc(data.clone());
        self.interned.insert(data, id);
        id
    }

    #[inline]
    pub fn data(&self, t: TypeId) -> &TypeData {
        &self.data[t]
    }

    /// Number of type handles ever allocated.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn int(&mut self, min: i64, max: i64) -> TypeId {
        self.intern(TypeData::Int { min, max })
    }

    pub fn int_con(&mut self, v: i64) -> TypeId {
        self.int(v, v)
    }

    pub fn float_con(&mut self, v: f64) -> TypeId {
        self.intern(TypeData::Float {
            sz: 0,
            bits: v.to_bits(),
        })
    }

    pub fn mem(&mut self, alias: u32, contents: TypeId) -> TypeId {
        self.intern(TypeData::Mem { alias, contents })
    }

    pub fn ptr(&mut self, nil: u8, obj: TypeId) -> TypeId {
        debug_assert!(nil <= 3);
        self.intern(TypeData::Ptr { nil, obj })
    }

    pub fn tuple(&mut self, ts: &[TypeId]) -> TypeId {
        self.intern(TypeData::Tuple(ts.into()))
    }

    /// A function pointer type over `ret` and `args`, matching any function
    /// of that signature (and null when `nullable`).
    pub fn fun_sig(&mut self, ret: TypeId, args: &[TypeId], nullable: bool) -> TypeId {
        let sig = self.sig_tuple(ret, args);
        let fidxs = !1u64 | u64::from(nullable);
        self.intern(TypeData::FunPtr {
            sig,
            fidxs,
            high: false,
        })
    }

    /// Signature tuple `[ret, args..]` as carried by function pointers.
    pub fn sig_tuple(&mut self, ret: TypeId, args: &[TypeId]) -> TypeId {
        let mut ts = Vec::with_capacity(args.len() + 1);
        ts.push(ret);
        ts.extend_from_slice(args);
        self.tuple(&ts)
    }

    /// The constant pointer to function number `fidx` of signature `sig`,
    /// a tuple from [`Types::sig_tuple`].
    pub fn fun_con(&mut self, sig: TypeId, fidx: u32) -> TypeId {
        debug_assert!((1..64).contains(&fidx));
        self.intern(TypeData::FunPtr {
            sig,
            fidxs: 1u64 << fidx,
            high: false,
        })
    }

    /// Change only the nil level of a pointer type.
    pub fn with_nil(&mut self, t: TypeId, nil: u8) -> TypeId {
        match *self.data(t) {
            TypeData::Ptr { obj, .. } => self.ptr(nil, obj),
            TypeData::FunPtr { sig, fidxs, high } => {
                let fidxs = if nil >= 3 { fidxs | 1 } else { fidxs & !1 };
                self.intern(TypeData::FunPtr { sig, fidxs, high })
            }
            _ => t,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True for types that denote exactly one value (and the dead values
    /// `Top`/`XCtrl`, which the optimizer also folds to constants).
    pub fn is_constant(&self, t: TypeId) -> bool {
        match *self.data(t) {
            TypeData::Top | TypeData::XCtrl => true,
            TypeData::Int { min, max } => min == max,
            TypeData::Float { sz, .. } => sz == 0,
            TypeData::Ptr { .. } => t == self.nil,
            TypeData::FunPtr { fidxs, high, .. } => !high && fidxs.count_ones() == 1,
            _ => false,
        }
    }

    pub fn is_high(&self, t: TypeId) -> bool {
        match *self.data(t) {
            TypeData::Top | TypeData::XCtrl => true,
            TypeData::Int { min, max } => min > max,
            TypeData::Float { sz, .. } => sz < 0,
            TypeData::Mem { contents, .. } => self.is_high(contents),
            TypeData::Ptr { nil, .. } => nil <= 1,
            TypeData::FunPtr { high, .. } => high,
            TypeData::Struct(ref s) => &*s.name == "$TOP",
            _ => false,
        }
    }

    pub fn int_range(&self, t: TypeId) -> Option<(i64, i64)> {
        match *self.data(t) {
            TypeData::Int { min, max } => Some((min, max)),
            _ => None,
        }
    }

    pub fn int_value(&self, t: TypeId) -> Option<i64> {
        match self.int_range(t) {
            Some((min, max)) if min == max => Some(min),
            _ => None,
        }
    }

    pub fn float_value(&self, t: TypeId) -> Option<f64> {
        match *self.data(t) {
            TypeData::Float { sz: 0, bits } => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    pub fn is_int(&self, t: TypeId) -> bool {
        matches!(self.data(t), TypeData::Int { .. })
    }

    pub fn is_float(&self, t: TypeId) -> bool {
        matches!(self.data(t), TypeData::Float { .. })
    }

    pub fn is_mem(&self, t: TypeId) -> bool {
        matches!(self.data(t), TypeData::Mem { .. })
    }

    pub fn is_ptr(&self, t: TypeId) -> bool {
        matches!(self.data(t), TypeData::Ptr { .. })
    }

    pub fn is_fun_ptr(&self, t: TypeId) -> bool {
        matches!(self.data(t), TypeData::FunPtr { .. })
    }

    /// `(nil, obj)` of a struct pointer.
    pub fn ptr_parts(&self, t: TypeId) -> Option<(u8, TypeId)> {
        match *self.data(t) {
            TypeData::Ptr { nil, obj } => Some((nil, obj)),
            _ => None,
        }
    }

    /// Might this pointer (struct or function) be null at runtime?
    pub fn may_be_nil(&self, t: TypeId) -> bool {
        match *self.data(t) {
            TypeData::Ptr { nil, .. } => nil == 3,
            TypeData::FunPtr { fidxs, high, .. } => !high && fidxs & 1 == 1,
            _ => false,
        }
    }

    pub fn struct_type(&self, t: TypeId) -> Option<&StructType> {
        match self.data(t) {
            TypeData::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The struct a pointer points at, if it is a named one.
    pub fn pointee(&self, ptr: TypeId) -> Option<&StructType> {
        let (_, obj) = self.ptr_parts(ptr)?;
        self.struct_type(obj).filter(|s| !s.name.starts_with('$'))
    }

    pub fn tuple_elems(&self, t: TypeId) -> Option<&[TypeId]> {
        match self.data(t) {
            TypeData::Tuple(ts) => Some(ts),
            _ => None,
        }
    }

    /// Element `i` of a tuple; `Top` for an above-center input.
    pub fn tuple_at(&self, t: TypeId, i: usize) -> TypeId {
        match self.data(t) {
            TypeData::Tuple(ts) => ts.get(i).copied().unwrap_or(self.bottom),
            TypeData::Top => self.top,
            _ => self.bottom,
        }
    }

    /// Declared return type of a function pointer type.
    pub fn fun_ret(&self, t: TypeId) -> Option<TypeId> {
        match *self.data(t) {
            TypeData::FunPtr { sig, .. } => self.tuple_elems(sig).and_then(|ts| ts.first().copied()),
            _ => None,
        }
    }

    /// Declared argument types of a function pointer type.
    pub fn fun_args(&self, t: TypeId) -> Option<&[TypeId]> {
        match *self.data(t) {
            TypeData::FunPtr { sig, .. } => self.tuple_elems(sig).map(|ts| &ts[1..]),
            _ => None,
        }
    }

    /// Single function index of a constant function pointer.
    pub fn fun_index(&self, t: TypeId) -> Option<u32> {
        match *self.data(t) {
            TypeData::FunPtr {
                fidxs, high: false, ..
            } if fidxs.count_ones() == 1 && fidxs != 1 => {
                Some(fidxs.trailing_zeros())
            }
            _ => None,
        }
    }

    /// Lowest type of the same kind; the type a `var` declaration infers.
    pub fn glb(&mut self, t: TypeId) -> TypeId {
        match *self.data(t) {
            TypeData::Int { .. } => self.int_bot,
            TypeData::Float { .. } => self.f64_ty,
            TypeData::Mem { .. } => self.mem_bot,
            TypeData::Ptr { nil, obj } => {
                if t == self.nil {
                    self.ptr_void_nil
                } else {
                    self.ptr(nil.max(2), obj)
                }
            }
            TypeData::FunPtr { sig, fidxs, .. } => self.intern(TypeData::FunPtr {
                sig,
                fidxs: !1u64 | (fidxs & 1),
                high: false,
            }),
            _ => self.bottom,
        }
    }

    /// The value a fresh field of this type starts out holding.
    pub fn make_zero(&mut self, t: TypeId) -> TypeId {
        match *self.data(t) {
            TypeData::Int { .. } => self.zero,
            TypeData::Float { .. } => self.float_con(0.0),
            TypeData::Ptr { .. } => self.nil,
            TypeData::FunPtr { .. } => self.fun_null,
            _ => self.top,
        }
    }

    /// Fresh memory alias class for a newly declared field.
    pub(crate) fn new_alias(&mut self) -> u32 {
        let a = self.next_alias;
        self.next_alias += 1;
        a
    }
}

impl Default for Types {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Types {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Types")
            .field("len", &self.data.len())
            .field("open", &self.open.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_handles() {
        let mut t = Types::new();
        let a = t.int(0, 10);
        let b = t.int(0, 10);
        assert_eq!(a, b);
        assert_ne!(a, t.int(0, 11));
        assert_eq!(t.int_con(1), t.one);
    }

    #[test]
    fn test_constants() {
        let mut t = Types::new();
        let three = t.int_con(3);
        let pi = t.float_con(3.14);
        assert!(t.is_constant(three));
        assert!(t.is_constant(pi));
        assert!(t.is_constant(t.nil));
        assert!(t.is_constant(t.xctrl));
        assert!(!t.is_constant(t.bool_ty));
        assert!(!t.is_constant(t.ptr_void));
        assert_eq!(t.int_value(three), Some(3));
        assert_eq!(t.float_value(pi), Some(3.14));
    }

    #[test]
    fn test_high_types() {
        let t = Types::new();
        assert!(t.is_high(t.int_top));
        assert!(!t.is_high(t.int_bot));
        assert!(t.is_high(t.xnil));
        assert!(!t.is_high(t.nil));
        assert!(t.is_high(t.flt_top));
    }

    #[test]
    fn test_glb_widens_to_kind_bottom() {
        let mut t = Types::new();
        let five = t.int_con(5);
        assert_eq!(t.glb(five), t.int_bot);
        let half = t.float_con(0.5);
        assert_eq!(t.glb(half), t.f64_ty);
        let nil = t.nil;
        assert_eq!(t.glb(nil), t.ptr_void_nil);
    }

    #[test]
    fn test_fun_sig_accessors() {
        let mut t = Types::new();
        let (int, flt) = (t.int_bot, t.f64_ty);
        let f = t.fun_sig(int, &[int, flt], false);
        assert_eq!(t.fun_ret(f), Some(int));
        assert_eq!(t.fun_args(f), Some(&[int, flt][..]));
        assert!(!t.may_be_nil(f));
        let f_nil = t.with_nil(f, 3);
        assert!(t.may_be_nil(f_nil));

        let TypeData::FunPtr { sig, .. } = *t.data(f) else {
            panic!("not a function type")
        };
        let con = t.fun_con(sig, 2);
        assert_eq!(t.fun_index(con), Some(2));
        assert!(t.is_constant(con));
        assert_eq!(t.sig_tuple(int, &[int, flt]), sig);
    }

    #[test]
    fn test_fun_con_keeps_signature() {
        let mut t = Types::new();
        let int = t.int_bot;
        let sig = t.sig_tuple(int, &[int]);
        let con = t.fun_con(sig, 3);
        assert_eq!(t.fun_ret(con), Some(int));
        assert_eq!(t.fun_args(con), Some(&[int][..]));
        let f = t.fun_sig(int, &[int], false);
        assert!(t.isa(con, f));
    }
}
