//! Runtime values and the object heap.

use rustc_hash::FxHashSet;
use std::fmt::Write;
use std::rc::Rc;

/// Index of an object in the [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

/// A value computed for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Flt(f64),
    /// The null pointer (struct or function).
    Null,
    Obj(ObjRef),
    /// Constant function pointer.
    Fun(u32),
    /// Memory state; carries nothing.
    Mem,
    /// A dead or above-center constant.
    Top,
}

impl Value {
    /// Integer view; null and non-numbers read as 0.
    pub fn as_int(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Flt(v) => v as i64,
            _ => 0,
        }
    }

    pub fn as_flt(self) -> f64 {
        match self {
            Value::Flt(v) => v,
            Value::Int(v) => v as f64,
            _ => 0.0,
        }
    }

    /// Branch condition: only 0 and null are false.
    pub fn is_truthy(self) -> bool {
        !matches!(self, Value::Int(0) | Value::Null)
    }

    pub fn from_bool(b: bool) -> Value {
        Value::Int(i64::from(b))
    }
}

/// A struct instance.
#[derive(Debug, Clone)]
pub struct Object {
    pub name: Rc<str>,
    pub fields: Vec<(Rc<str>, Value)>,
}

/// All objects allocated by one evaluation. Objects are never freed.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn alloc(&mut self, obj: Object) -> ObjRef {
        self.objects.push(obj);
        ObjRef(self.objects.len() as u32 - 1)
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        &self.objects[r.0 as usize]
    }

    pub fn load(&self, r: ObjRef, field: &str) -> Option<Value> {
        self.get(r)
            .fields
            .iter()
            .find(|(n, _)| &**n == field)
            .map(|&(_, v)| v)
    }

    /// Overwrite a field; false if the object has no such field.
    pub fn store(&mut self, r: ObjRef, field: &str, val: Value) -> bool {
        match self.objects[r.0 as usize]
            .fields
            .iter_mut()
            .find(|(n, _)| &**n == field)
        {
            Some(slot) => {
                slot.1 = val;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Render a value: `3`, `1.5`, `null`, `S{f=1,g=null}`. An object seen
    /// before prints as `$cyclic`.
    pub fn show(&self, v: Value) -> String {
        let mut out = String::new();
        let mut seen = FxHashSet::default();
        self.write(&mut out, v, &mut seen);
        out
    }

    fn write(&self, out: &mut String, v: Value, seen: &mut FxHashSet<ObjRef>) {
        match v {
            Value::Int(x) => {
                let _ = write!(out, "{x}");
            }
            Value::Flt(x) => {
                let _ = write!(out, "{x:?}");
            }
            Value::Null => out.push_str("null"),
            Value::Fun(fidx) => {
                let _ = write!(out, "{{fun #{fidx}}}");
            }
            Value::Mem => out.push_str("$mem"),
            Value::Top => out.push_str("Top"),
            Value::Obj(r) => {
                if !seen.insert(r) {
                    out.push_str("$cyclic");
                    return;
                }
                let obj = self.get(r);
                out.push_str(&obj.name);
                out.push('{');
                for (i, (name, fv)) in obj.fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(name);
                    out.push('=');
                    self.write(out, *fv, seen);
                }
                out.push('}');
            }
        }
    }
}
