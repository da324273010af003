//! Block interpreter over the scheduled graph.
//!
//! Execution walks basic blocks in the order control takes them. On entry
//! to a Region or Loop every Phi reads its input for the path just taken,
//! all reads happening before any write. The remaining nodes of the block
//! then run in their local-schedule order, and the tail picks the next
//! block: an If by its predicate, a Call by running the callee first.

use crate::error::{EvalError, Result};
use crate::frame::{FrameStack, MAX_CALL_DEPTH};
use crate::value::{Heap, Object, Value};
use rustc_hash::FxHashMap;
use sonic_jit::sched::{BasicBlock, BlockId, Cfg};
use sonic_jit::{CodeGen, Graph, NodeId, Op, Phase, TypeId, Types};

/// Loop iterations plus calls allowed by [`evaluate`].
pub const DEFAULT_FUEL: usize = 10_000;

/// Compile `code` through local scheduling and run `main(arg)`, printing
/// the returned value.
pub fn evaluate(code: &mut CodeGen, arg: i64) -> Result<String> {
    evaluate_with_fuel(code, arg, DEFAULT_FUEL)
}

/// [`evaluate`] with an explicit budget of loop iterations and calls.
pub fn evaluate_with_fuel(code: &mut CodeGen, arg: i64, fuel: usize) -> Result<String> {
    code.driver(Phase::LocalSched)?;
    let code: &CodeGen = code;
    let mut interp = Interpreter::new(code, arg, fuel)?;
    let result = interp.run_main()?;
    log::debug!(
        "evaluate({arg}): {} fuel left, {} objects",
        interp.fuel,
        interp.heap.len()
    );
    Ok(interp.heap.show(result))
}

/// Interpreter state for one run of `main`.
pub struct Interpreter<'a> {
    graph: &'a Graph,
    types: &'a Types,
    cfg: &'a Cfg,
    arg: Value,
    frames: FrameStack,
    heap: Heap,
    /// Fun node of every function index.
    funs: FxHashMap<u32, NodeId>,
    fuel: usize,
}

impl<'a> Interpreter<'a> {
    /// Set up a run over a scheduled session.
    pub fn new(code: &'a CodeGen, arg: i64, fuel: usize) -> Result<Self> {
        let cfg = code
            .cfg()
            .ok_or_else(|| EvalError::Unscheduled("Start".to_string()))?;
        let graph = &code.graph;
        let types = &code.types;
        let arg_ty = types.tuple_at(graph.ty(graph.start), 2);
        let arg = if types.is_float(arg_ty) {
            Value::Flt(arg as f64)
        } else {
            Value::Int(arg)
        };
        let funs = graph
            .live_nodes()
            .filter_map(|n| match graph.op(n) {
                Op::Fun { fidx, .. } => Some((*fidx, n)),
                _ => None,
            })
            .collect();
        Ok(Self {
            graph,
            types,
            cfg,
            arg,
            frames: FrameStack::new(),
            heap: Heap::default(),
            funs,
            fuel,
        })
    }

    /// Run from Start until main returns.
    pub fn run_main(&mut self) -> Result<Value> {
        self.run(self.cfg.entry)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Run blocks from `block` until a Return.
    fn run(&mut self, mut block: BlockId) -> Result<Value> {
        let (graph, cfg) = (self.graph, self.cfg);
        let mut prior: Option<NodeId> = None;
        loop {
            let bb = cfg.block(block);
            let head = bb.head;
            log::trace!("enter B{block} at {head} {}", graph.op(head).name());
            if matches!(graph.op(head), Op::Loop | Op::Fun { .. }) {
                self.tick()?;
            }
            self.assign_phis(bb, prior)?;
            for &n in &bb.nodes {
                if n == head || graph.is_cfg(n) || graph.op(n).is_phi() {
                    continue;
                }
                let v = self.compute(n)?;
                self.frames.set(n, v);
            }

            let next = match bb.tail.map(|t| (t, graph.op(t))) {
                Some((t, Op::Return)) => return self.val(graph.input(t, 2)),
                Some((t, Op::If)) => {
                    let idx = if self.val(graph.input(t, 1))?.is_truthy() {
                        0
                    } else {
                        1
                    };
                    self.successor(bb, |h| {
                        graph.input(h, 0) == Some(t) && graph.op(h).proj_idx() == Some(idx)
                    })?
                }
                Some((t, Op::Call)) => {
                    let ret = self.call(t)?;
                    let next = self.successor(bb, |h| matches!(graph.op(h), Op::CallEnd))?;
                    self.frames.set(cfg.block(next).head, ret);
                    next
                }
                _ => self.successor(bb, |h| !matches!(graph.op(h), Op::Fun { .. }))?,
            };
            prior = Some(bb.tail.unwrap_or(head));
            block = next;
        }
    }

    fn successor(&self, bb: &BasicBlock, want: impl Fn(NodeId) -> bool) -> Result<BlockId> {
        bb.successors
            .iter()
            .copied()
            .find(|&s| want(self.cfg.block(s).head))
            .ok_or_else(|| EvalError::NoSuccessor(bb.head.to_string()))
    }

    /// Parallel Phi assignment for the path from `prior`.
    fn assign_phis(&mut self, bb: &BasicBlock, prior: Option<NodeId>) -> Result<()> {
        let graph = self.graph;
        let head = bb.head;
        if !matches!(graph.op(head), Op::Region | Op::Loop) {
            return Ok(());
        }
        let Some(path) = prior.and_then(|p| {
            graph
                .node(head)
                .inputs
                .iter()
                .position(|&x| x == Some(p))
        }) else {
            return Ok(());
        };
        let mut staged = Vec::new();
        for &n in &bb.nodes {
            if matches!(graph.op(n), Op::Phi { .. }) && graph.input(n, 0) == Some(head) {
                staged.push((n, self.val(graph.input(n, path))?));
            }
        }
        for (n, v) in staged {
            self.frames.set(n, v);
        }
        Ok(())
    }

    /// Run the callee of `call` in a fresh frame; returns its result.
    fn call(&mut self, call: NodeId) -> Result<Value> {
        let graph = self.graph;
        let inputs = &graph.node(call).inputs;
        let n = inputs.len();
        let fidx = match self.val(inputs[n - 1])? {
            Value::Fun(fidx) => fidx,
            Value::Null => return Err(EvalError::NullAccess("function".to_string())),
            other => return Err(EvalError::BadCall(self.heap.show(other))),
        };
        let fun = *self
            .funs
            .get(&fidx)
            .ok_or_else(|| EvalError::BadCall(format!("function #{fidx}")))?;
        let args = inputs[2..n - 1]
            .iter()
            .map(|&a| self.val(a))
            .collect::<Result<Vec<_>>>()?;
        if self.frames.depth() >= MAX_CALL_DEPTH {
            return Err(EvalError::Timeout);
        }
        let block = self
            .cfg
            .block_of_cfg(fun)
            .ok_or_else(|| EvalError::NoSuccessor(call.to_string()))?;

        self.frames.push();
        for &u in graph.uses(fun) {
            if graph.is_dead(u) {
                continue;
            }
            if let Op::Parm { idx, .. } = graph.op(u) {
                let v = match *idx {
                    1 => Value::Mem,
                    i => i
                        .checked_sub(2)
                        .and_then(|k| args.get(k as usize).copied())
                        .unwrap_or(Value::Top),
                };
                self.frames.set(u, v);
            }
        }
        let ret = self.run(block);
        self.frames.pop();
        ret
    }

    fn tick(&mut self) -> Result<()> {
        if self.fuel == 0 {
            return Err(EvalError::Timeout);
        }
        self.fuel -= 1;
        Ok(())
    }

    // =========================================================================
    // Data
    // =========================================================================

    fn val(&self, n: Option<NodeId>) -> Result<Value> {
        let n = n.ok_or_else(|| EvalError::Unscheduled("<none>".to_string()))?;
        if let Some(v) = self.frames.get(n) {
            return Ok(v);
        }
        match self.graph.op(n) {
            Op::Con(t) => Ok(self.con(*t)),
            op => Err(EvalError::Unscheduled(format!("{n} {}", op.name()))),
        }
    }

    fn input(&self, n: NodeId, i: usize) -> Result<Value> {
        self.val(self.graph.input(n, i))
    }

    fn int(&self, n: NodeId, i: usize) -> Result<i64> {
        Ok(self.input(n, i)?.as_int())
    }

    fn flt(&self, n: NodeId, i: usize) -> Result<f64> {
        Ok(self.input(n, i)?.as_flt())
    }

    fn con(&self, t: TypeId) -> Value {
        let types = self.types;
        if let Some(v) = types.int_value(t) {
            Value::Int(v)
        } else if let Some(v) = types.float_value(t) {
            Value::Flt(v)
        } else if t == types.nil || t == types.fun_null {
            Value::Null
        } else if let Some(fidx) = types.fun_index(t) {
            Value::Fun(fidx)
        } else {
            Value::Top
        }
    }

    fn compute(&mut self, n: NodeId) -> Result<Value> {
        let graph = self.graph;
        let v = match graph.op(n) {
            Op::Con(t) => self.con(*t),
            Op::Proj { idx, .. } => {
                let parent = graph.input(n, 0);
                match (parent.map(|p| graph.op(p)), *idx) {
                    (Some(Op::Start { .. }), 2) => self.arg,
                    (Some(Op::New(_)), 1) | (Some(Op::CallEnd), 2) => self.input(n, 0)?,
                    (Some(Op::Start { .. } | Op::New(_) | Op::CallEnd), 1 | 0) => Value::Mem,
                    _ => Value::Top,
                }
            }

            Op::Add => Value::Int(self.int(n, 1)?.wrapping_add(self.int(n, 2)?)),
            Op::Sub => Value::Int(self.int(n, 1)?.wrapping_sub(self.int(n, 2)?)),
            Op::Mul => Value::Int(self.int(n, 1)?.wrapping_mul(self.int(n, 2)?)),
            Op::Div => {
                let (a, b) = (self.int(n, 1)?, self.int(n, 2)?);
                Value::Int(if b == 0 { 0 } else { a.wrapping_div(b) })
            }
            Op::Minus => Value::Int(self.int(n, 1)?.wrapping_neg()),
            Op::And => Value::Int(self.int(n, 1)? & self.int(n, 2)?),
            Op::Or => Value::Int(self.int(n, 1)? | self.int(n, 2)?),
            Op::Xor => Value::Int(self.int(n, 1)? ^ self.int(n, 2)?),
            Op::Shl => Value::Int(self.int(n, 1)?.wrapping_shl((self.int(n, 2)? & 63) as u32)),
            Op::Sar => Value::Int(self.int(n, 1)?.wrapping_shr((self.int(n, 2)? & 63) as u32)),
            Op::Shr => {
                let (a, b) = (self.int(n, 1)?, self.int(n, 2)?);
                Value::Int(((a as u64) >> (b & 63)) as i64)
            }

            Op::AddF => Value::Flt(self.flt(n, 1)? + self.flt(n, 2)?),
            Op::SubF => Value::Flt(self.flt(n, 1)? - self.flt(n, 2)?),
            Op::MulF => Value::Flt(self.flt(n, 1)? * self.flt(n, 2)?),
            Op::DivF => {
                let (a, b) = (self.flt(n, 1)?, self.flt(n, 2)?);
                Value::Flt(if b == 0.0 { 0.0 } else { a / b })
            }
            Op::MinusF => Value::Flt(-self.flt(n, 1)?),
            Op::ToFloat => Value::Flt(self.int(n, 1)? as f64),

            Op::Eq => Value::from_bool(self.input(n, 1)? == self.input(n, 2)?),
            Op::Lt => Value::from_bool(self.int(n, 1)? < self.int(n, 2)?),
            Op::Le => Value::from_bool(self.int(n, 1)? <= self.int(n, 2)?),
            Op::EqF => Value::from_bool(self.flt(n, 1)? == self.flt(n, 2)?),
            Op::LtF => Value::from_bool(self.flt(n, 1)? < self.flt(n, 2)?),
            Op::LeF => Value::from_bool(self.flt(n, 1)? <= self.flt(n, 2)?),
            Op::Not => Value::from_bool(!self.input(n, 1)?.is_truthy()),

            Op::Cast(_) | Op::ReadOnly => self.input(n, 1)?,

            Op::New(ptr) => {
                let types = self.types;
                let Some(st) = types.pointee(*ptr) else {
                    return Err(EvalError::BadCall(format!("new {}", types.show(*ptr))));
                };
                let mut fields = Vec::with_capacity(st.fields.len());
                for (i, f) in st.fields.iter().enumerate() {
                    fields.push((f.name.clone(), self.input(n, 2 + i)?));
                }
                let obj = self.heap.alloc(Object {
                    name: st.name.clone(),
                    fields,
                });
                Value::Obj(obj)
            }
            Op::Load { name, .. } => match self.input(n, 2)? {
                Value::Obj(r) => self
                    .heap
                    .load(r, name)
                    .ok_or_else(|| EvalError::NullAccess(name.to_string()))?,
                _ => return Err(EvalError::NullAccess(name.to_string())),
            },
            Op::Store { name, .. } => {
                let val = self.input(n, 3)?;
                let stored = match self.input(n, 2)? {
                    Value::Obj(r) => self.heap.store(r, name, val),
                    _ => false,
                };
                if !stored {
                    return Err(EvalError::NullAccess(name.to_string()));
                }
                Value::Mem
            }

            _ => Value::Top,
        };
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_jit::CodeGenConfig;

    fn run(src: &str, arg: i64) -> Result<String> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut code = CodeGen::new(CodeGenConfig::default());
        sonic_parser::parse(&mut code, src).map_err(sonic_jit::CompileError::from)?;
        evaluate(&mut code, arg)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("return arg*2+1;", 20).unwrap(), "41");
        assert_eq!(run("return arg/0;", 7).unwrap(), "0");
        assert_eq!(run("return -1 >>> 60;", 0).unwrap(), "15");
    }

    #[test]
    fn test_branches() {
        let src = "int a=1; if (arg==1) a=2; else a=3; return a;";
        assert_eq!(run(src, 1).unwrap(), "2");
        assert_eq!(run(src, 0).unwrap(), "3");
    }

    #[test]
    fn test_loop_sum() {
        let src = "int sum=0; int i=0; while (i<arg) { i=i+1; sum=sum+i; } return sum;";
        assert_eq!(run(src, 10).unwrap(), "55");
        assert_eq!(run(src, 0).unwrap(), "0");
    }

    #[test]
    fn test_timeout() {
        let mut code = CodeGen::new(CodeGenConfig::default());
        sonic_parser::parse(&mut code, "int i=0; while (arg) i=i+1; return i;").unwrap();
        assert_eq!(evaluate_with_fuel(&mut code, 1, 50), Err(EvalError::Timeout));
    }

    #[test]
    fn test_float_math() {
        assert_eq!(run("flt f = arg; return f / 2;", 3).unwrap(), "1.5");
    }
}
