//! Struct types and their recursive groups.
//!
//! A struct may point at itself (`struct C { C? l; }`), so it cannot be
//! hash-consed bottom-up. Instead structs are built as a *group*: every
//! member gets an arena slot first, the fields are filled in referring to
//! those slots, and only then is the group installed. Installing
//!
//! - finds members that are bisimilar to an already installed struct and
//!   forwards them to it,
//! - rewrites the remaining members' pointer fields through that forwarding,
//! - interns the survivors and builds their dual structs.
//!
//! The same machinery serves declared structs, `meet` of two same-named
//! structs, and `make_ro`.

use super::{Field, StructType, TypeData, TypeId, Types};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

/// Slots allocated while building one recursive group.
#[derive(Default)]
struct Group<K> {
    map: FxHashMap<K, TypeId>,
    members: Vec<TypeId>,
}

impl Types {
    // =========================================================================
    // Declaration
    // =========================================================================

    /// Start (or resume, after a forward reference) a declared struct.
    pub fn declare_struct(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.lookup_struct(name) {
            return id;
        }
        let id = self.data.alloc(TypeData::Struct(StructType {
            name: Rc::from(name),
            open: true,
            fields: Vec::new(),
        }));
        self.open.push(id);
        log::trace!("declared struct {name} as {id:?}");
        id
    }

    /// A struct by name: installed, pending, or still open.
    pub fn lookup_struct(&self, name: &str) -> Option<TypeId> {
        if let Some(ids) = self.structs_by_name.get(name) {
            // Declared structs are the first installed under their name.
            return ids.first().copied();
        }
        self.open
            .iter()
            .chain(self.pending.iter())
            .copied()
            .find(|&id| self.struct_type(id).is_some_and(|s| &*s.name == name))
    }

    /// Every installed struct called `name`, declared one first.
    pub fn structs_named(&self, name: &str) -> &[TypeId] {
        self.structs_by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// True while the struct has been referenced or started but not closed.
    pub fn is_open(&self, id: TypeId) -> bool {
        self.struct_type(id).is_some_and(|s| s.open)
    }

    /// Structs referenced ahead of their declaration and never declared.
    pub fn open_struct_names(&self) -> Vec<Rc<str>> {
        self.open
            .iter()
            .filter_map(|&id| self.struct_type(id).map(|s| s.name.clone()))
            .collect()
    }

    /// Append a field to an open struct, giving it a fresh memory alias.
    pub fn add_field(&mut self, id: TypeId, name: &str, ty: TypeId, is_final: bool) -> u32 {
        let alias = self.new_alias();
        if let TypeData::Struct(s) = &mut self.data[id] {
            s.fields.push(Field {
                name: Rc::from(name),
                ty,
                alias,
                is_final,
            });
        }
        alias
    }

    /// Finish a struct body. Once no struct is left open the whole pending
    /// group is installed; returns the installed handle of `id` if so.
    pub fn close_struct(&mut self, id: TypeId) -> Option<TypeId> {
        if let TypeData::Struct(s) = &mut self.data[id] {
            s.open = false;
        }
        self.open.retain(|&o| o != id);
        self.pending.push(id);
        if !self.open.is_empty() {
            return None;
        }
        let group = std::mem::take(&mut self.pending);
        let fwd = self.install_group(&group);
        Some(fwd.get(&id).copied().unwrap_or(id))
    }

    // =========================================================================
    // Install
    // =========================================================================

    /// Intern a freshly built group; returns where each member ended up.
    fn install_group(&mut self, members: &[TypeId]) -> FxHashMap<TypeId, TypeId> {
        let mut fwd: FxHashMap<TypeId, TypeId> = FxHashMap::default();
        for &m in members {
            let Some(name) = self.struct_type(m).map(|s| s.name.clone()) else {
                continue;
            };
            let candidates = self.structs_by_name.get(&name).cloned().unwrap_or_default();
            let found = candidates.into_iter().find(|&e| {
                let mut seen = FxHashSet::default();
                self.bisimilar(m, e, &mut seen)
            });
            if let Some(e) = found {
                fwd.insert(m, e);
            }
        }

        let kept: Vec<TypeId> = members
            .iter()
            .copied()
            .filter(|m| !fwd.contains_key(m))
            .collect();

        // Point survivors at the installed copies of forwarded members.
        for &m in &kept {
            let fields = match self.struct_type(m) {
                Some(s) => s.fields.clone(),
                None => continue,
            };
            let fields: Vec<Field> = fields
                .into_iter()
                .map(|mut f| {
                    if let Some((nil, obj)) = self.ptr_parts(f.ty) {
                        if let Some(&to) = fwd.get(&obj) {
                            f.ty = self.ptr(nil, to);
                        }
                    }
                    f
                })
                .collect();
            if let TypeData::Struct(s) = &mut self.data[m] {
                s.fields = fields;
            }
        }

        for &m in &kept {
            let data = self.data[m].clone();
            self.interned.insert(data, m);
            if let Some(s) = self.struct_type(m) {
                let name = s.name.clone();
                self.structs_by_name.entry(name).or_default().push(m);
            }
        }
        self.install_duals(&kept);

        log::debug!(
            "installed struct group: {} kept, {} forwarded",
            kept.len(),
            fwd.len()
        );
        for &m in members {
            fwd.entry(m).or_insert(m);
        }
        fwd
    }

    /// Build the mirrored group: dual field types, flipped finality. The
    /// duals are registered by name like any installed struct, so later
    /// meets and joins that rebuild one of them forward to it.
    fn install_duals(&mut self, kept: &[TypeId]) {
        let mut slot: FxHashMap<TypeId, TypeId> = FxHashMap::default();
        for &m in kept {
            let Some((name, empty)) = self
                .struct_type(m)
                .map(|s| (s.name.clone(), s.fields.is_empty()))
            else {
                continue;
            };
            // Nothing to flip.
            if empty {
                self.duals.set(m, m);
                continue;
            }
            let d = self.data.alloc(TypeData::Struct(StructType {
                name,
                open: false,
                fields: Vec::new(),
            }));
            slot.insert(m, d);
        }
        for &m in kept {
            let Some(&d) = slot.get(&m) else {
                continue;
            };
            let fields = match self.struct_type(m) {
                Some(s) => s.fields.clone(),
                None => continue,
            };
            let fields: Vec<Field> = fields
                .into_iter()
                .map(|f| {
                    let ty = match self.ptr_parts(f.ty) {
                        Some((nil, obj)) if slot.contains_key(&obj) => self.ptr(3 - nil, slot[&obj]),
                        _ => self.dual(f.ty),
                    };
                    Field {
                        name: f.name,
                        ty,
                        alias: f.alias,
                        is_final: !f.is_final,
                    }
                })
                .collect();
            let name = match &mut self.data[d] {
                TypeData::Struct(s) => {
                    s.fields = fields;
                    s.name.clone()
                }
                _ => continue,
            };
            let data = self.data[d].clone();
            self.interned.insert(data, d);
            self.structs_by_name.entry(name).or_default().push(d);
            self.duals.set(m, d);
            self.duals.set(d, m);
        }
    }

    /// Coinductive structural equality; pairs already assumed equal are
    /// not revisited, which is what terminates the walk on cycles.
    fn bisimilar(&self, a: TypeId, b: TypeId, seen: &mut FxHashSet<(TypeId, TypeId)>) -> bool {
        if a == b || !seen.insert((a, b)) {
            return true;
        }
        let (Some(sa), Some(sb)) = (self.struct_type(a), self.struct_type(b)) else {
            return false;
        };
        if sa.name != sb.name || sa.fields.len() != sb.fields.len() {
            return false;
        }
        sa.fields.iter().zip(sb.fields.iter()).all(|(fa, fb)| {
            if fa.name != fb.name || fa.alias != fb.alias || fa.is_final != fb.is_final {
                return false;
            }
            if fa.ty == fb.ty {
                return true;
            }
            match (self.ptr_parts(fa.ty), self.ptr_parts(fb.ty)) {
                (Some((na, oa)), Some((nb, ob))) => na == nb && self.bisimilar(oa, ob, seen),
                _ => false,
            }
        })
    }

    // =========================================================================
    // Meet
    // =========================================================================

    /// Meet of two struct types; the result is memoized by the caller.
    pub(super) fn meet_struct(&mut self, a: TypeId, b: TypeId) -> TypeId {
        let mut g = Group::default();
        let root = self.group_meet(&mut g, a, b);
        let fwd = self.install_group(&g.members);
        fwd.get(&root).copied().unwrap_or(root)
    }

    fn group_meet(&mut self, g: &mut Group<(TypeId, TypeId)>, a: TypeId, b: TypeId) -> TypeId {
        if a == b || b == self.struct_top {
            return a;
        }
        if a == self.struct_top {
            return b;
        }
        if a == self.struct_bot || b == self.struct_bot {
            return self.struct_bot;
        }
        if let Some(&m) = self.meet_memo.get(&(a, b)) {
            return m;
        }
        if let Some(&slot) = g.map.get(&(a, b)) {
            return slot;
        }
        let (Some(sa), Some(sb)) = (self.struct_type(a).cloned(), self.struct_type(b).cloned()) else {
            return self.struct_bot;
        };
        let same_shape = sa.name == sb.name
            && !sa.open
            && !sb.open
            && sa.fields.len() == sb.fields.len()
            && sa.fields.iter().zip(&sb.fields).all(|(x, y)| x.name == y.name);
        if !same_shape {
            return self.struct_bot;
        }

        let slot = self.data.alloc(TypeData::Struct(StructType {
            name: sa.name.clone(),
            open: true,
            fields: Vec::new(),
        }));
        g.map.insert((a, b), slot);
        g.members.push(slot);

        let mut fields = Vec::with_capacity(sa.fields.len());
        for (fa, fb) in sa.fields.iter().zip(&sb.fields) {
            let ty = match (self.ptr_parts(fa.ty), self.ptr_parts(fb.ty)) {
                (Some((na, oa)), Some((nb, ob))) => {
                    let obj = self.group_meet(g, oa, ob);
                    self.ptr(na.max(nb), obj)
                }
                _ => self.meet(fa.ty, fb.ty),
            };
            fields.push(Field {
                name: fa.name.clone(),
                ty,
                alias: fa.alias.min(fb.alias),
                is_final: fa.is_final || fb.is_final,
            });
        }
        if let TypeData::Struct(s) = &mut self.data[slot] {
            s.fields = fields;
            s.open = false;
        }
        slot
    }

    // =========================================================================
    // Read-only views
    // =========================================================================

    /// The read-only view of a type: every reachable field becomes final.
    pub fn make_ro(&mut self, t: TypeId) -> TypeId {
        match *self.data(t) {
            TypeData::Ptr { nil, obj } => {
                let obj = self.make_ro(obj);
                self.ptr(nil, obj)
            }
            TypeData::Struct(ref s) if !s.open && !s.name.starts_with('$') => {
                if let Some(&r) = self.ro_memo.get(&t) {
                    return r;
                }
                let mut g = Group::default();
                let root = self.group_ro(&mut g, t);
                let fwd = self.install_group(&g.members);
                let r = fwd.get(&root).copied().unwrap_or(root);
                self.ro_memo.insert(t, r);
                self.ro_memo.insert(r, r);
                r
            }
            _ => t,
        }
    }

    fn group_ro(&mut self, g: &mut Group<TypeId>, t: TypeId) -> TypeId {
        if let Some(&r) = self.ro_memo.get(&t) {
            return r;
        }
        if let Some(&slot) = g.map.get(&t) {
            return slot;
        }
        let Some(s) = self.struct_type(t).cloned() else {
            return t;
        };
        if s.name.starts_with('$') {
            return t;
        }
        let slot = self.data.alloc(TypeData::Struct(StructType {
            name: s.name.clone(),
            open: true,
            fields: Vec::new(),
        }));
        g.map.insert(t, slot);
        g.members.push(slot);

        let mut fields = Vec::with_capacity(s.fields.len());
        for f in &s.fields {
            let ty = match self.ptr_parts(f.ty) {
                Some((nil, obj)) => {
                    let obj = self.group_ro(g, obj);
                    self.ptr(nil, obj)
                }
                None => f.ty,
            };
            fields.push(Field {
                name: f.name.clone(),
                ty,
                alias: f.alias,
                is_final: true,
            });
        }
        if let TypeData::Struct(st) = &mut self.data[slot] {
            st.fields = fields;
            st.open = false;
        }
        slot
    }

    /// Every field reachable from `t` is final.
    pub fn is_ro(&self, t: TypeId) -> bool {
        let mut seen = FxHashSet::default();
        self.is_ro_walk(t, &mut seen)
    }

    fn is_ro_walk(&self, t: TypeId, seen: &mut FxHashSet<TypeId>) -> bool {
        let obj = match *self.data(t) {
            TypeData::Ptr { obj, .. } => obj,
            TypeData::Struct(_) => t,
            _ => return true,
        };
        if !seen.insert(obj) {
            return true;
        }
        match self.struct_type(obj) {
            Some(s) if !s.name.starts_with('$') => s
                .fields
                .iter()
                .all(|f| f.is_final && self.is_ro_walk(f.ty, seen)),
            _ => true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::types::{TypeData, Types};

    /// `struct C { C? l; }`
    fn linked(t: &mut Types) -> crate::types::TypeId {
        let c = t.declare_struct("C");
        let ptr = t.ptr(3, c);
        t.add_field(c, "l", ptr, false);
        t.close_struct(c).unwrap_or(c)
    }

    #[test]
    fn test_self_referential_struct_installs() {
        let mut t = Types::new();
        let c = linked(&mut t);
        assert!(!t.is_open(c));
        let s = t.struct_type(c).cloned().unwrap();
        let (nil, obj) = t.ptr_parts(s.fields[0].ty).unwrap();
        assert_eq!(nil, 3);
        assert_eq!(obj, c);
        assert_eq!(t.lookup_struct("C"), Some(c));
    }

    #[test]
    fn test_forward_reference_waits_for_group() {
        let mut t = Types::new();
        let a = t.declare_struct("A");
        let b = t.declare_struct("B");
        let pb = t.ptr(3, b);
        t.add_field(a, "b", pb, false);
        assert_eq!(t.close_struct(a), None);
        assert_eq!(t.open_struct_names().len(), 1);
        let pa = t.ptr(3, a);
        t.add_field(b, "a", pa, false);
        assert!(t.close_struct(b).is_some());
        assert!(t.open_struct_names().is_empty());
        let a_installed = t.lookup_struct("A").unwrap();
        assert_eq!(a_installed, a);
    }

    #[test]
    fn test_struct_dual_round_trips() {
        let mut t = Types::new();
        let c = linked(&mut t);
        let p = t.ptr(2, c);
        let d = t.dual(p);
        assert_ne!(d, p);
        assert_eq!(t.dual(d), p);
        assert_eq!(t.join(p, p), p);
        let pn = t.ptr(3, c);
        assert_eq!(t.join(pn, p), p);
    }

    #[test]
    fn test_make_ro_is_a_supertype() {
        let mut t = Types::new();
        let c = linked(&mut t);
        let p = t.ptr(2, c);
        let ro = t.make_ro(p);
        assert_ne!(ro, p);
        assert!(t.is_ro(ro));
        assert!(!t.is_ro(p));
        assert!(t.isa(p, ro));
        assert_eq!(t.make_ro(ro), ro);
        // Meeting the mutable view with the read-only one lands on the
        // existing read-only group rather than a fresh copy.
        assert_eq!(t.meet(p, ro), ro);
    }

    #[test]
    fn test_joins_land_on_installed_structs() {
        let mut t = Types::new();
        let c = linked(&mut t);
        let p = t.ptr(2, c);
        let ro = t.make_ro(p);
        let xp = t.dual(p);
        let xro = t.dual(ro);

        assert_eq!(t.join(p, ro), p);
        assert_eq!(t.join(ro, p), p);
        let j = t.join(p, xp);
        assert!(t.isa(j, p));
        assert!(t.isa(j, xp));
        assert_eq!(t.meet(xp, xro), xp);
        let (xc, xc_ro) = (t.ptr_parts(xp).unwrap().1, t.ptr_parts(xro).unwrap().1);
        assert_eq!(t.meet(xc, xc_ro), xc);
        assert_eq!(t.meet(c, xc), t.ptr_parts(ro).unwrap().1);
        // The mutable view, the read-only view and their duals.
        assert_eq!(t.structs_named("C").len(), 4);
    }

    #[test]
    fn test_different_structs_meet_to_generic() {
        let mut t = Types::new();
        let c = linked(&mut t);
        let d = t.declare_struct("D");
        t.add_field(d, "x", t.int_bot, false);
        let d = t.close_struct(d).unwrap_or(d);
        let m = t.meet(c, d);
        assert_eq!(m, t.struct_bot);
        let pc = t.ptr(2, c);
        let m = t.meet(pc, t.nil);
        let TypeData::Ptr { nil, obj } = *t.data(m) else {
            panic!("expected pointer")
        };
        assert_eq!((nil, obj), (3, c));
    }
}
