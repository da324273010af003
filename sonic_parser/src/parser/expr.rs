//! Expression parsing with precedence climbing.
//!
//! Binary operators are left associative. Every operator becomes a node as
//! soon as both operands exist, so constant subexpressions fold before the
//! parser moves on.

use super::Parser;
use crate::token::{Keyword, TokenKind};
use sonic_jit::{NodeId, Op, ParseError, ParseResult, TypeId};
use std::rc::Rc;

// =============================================================================
// Precedence Levels
// =============================================================================

/// Binary operator precedence levels, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    /// Lowest precedence.
    Lowest = 0,
    /// `&`, `|`, `^`
    Bitwise = 1,
    /// `==`, `!=`, `<`, `<=`, `>`, `>=`
    Comparison = 2,
    /// `<<`, `>>`, `>>>`
    Shift = 3,
    /// `+`, `-`
    Additive = 4,
    /// `*`, `/`
    Multiplicative = 5,
    /// Unary `-`, `!`
    Unary = 6,
}

impl Precedence {
    /// Get the next higher precedence level.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Lowest => Self::Bitwise,
            Self::Bitwise => Self::Comparison,
            Self::Comparison => Self::Shift,
            Self::Shift => Self::Additive,
            Self::Additive => Self::Multiplicative,
            Self::Multiplicative | Self::Unary => Self::Unary,
        }
    }
}

/// Binary operators of the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Sar,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    fn from_token(kind: &TokenKind) -> Option<(BinOp, Precedence)> {
        Some(match kind {
            TokenKind::Amp => (BinOp::And, Precedence::Bitwise),
            TokenKind::Pipe => (BinOp::Or, Precedence::Bitwise),
            TokenKind::Caret => (BinOp::Xor, Precedence::Bitwise),
            TokenKind::EqEq => (BinOp::Eq, Precedence::Comparison),
            TokenKind::NotEq => (BinOp::Ne, Precedence::Comparison),
            TokenKind::Lt => (BinOp::Lt, Precedence::Comparison),
            TokenKind::Le => (BinOp::Le, Precedence::Comparison),
            TokenKind::Gt => (BinOp::Gt, Precedence::Comparison),
            TokenKind::Ge => (BinOp::Ge, Precedence::Comparison),
            TokenKind::Shl => (BinOp::Shl, Precedence::Shift),
            TokenKind::Sar => (BinOp::Sar, Precedence::Shift),
            TokenKind::Shr => (BinOp::Shr, Precedence::Shift),
            TokenKind::Plus => (BinOp::Add, Precedence::Additive),
            TokenKind::Minus => (BinOp::Sub, Precedence::Additive),
            TokenKind::Star => (BinOp::Mul, Precedence::Multiplicative),
            TokenKind::Slash => (BinOp::Div, Precedence::Multiplicative),
            _ => return None,
        })
    }
}

impl<'src, 'c> Parser<'src, 'c> {
    /// Parse an expression.
    pub(super) fn parse_expression(&mut self) -> ParseResult<NodeId> {
        self.parse_precedence(Precedence::Lowest)
    }

    /// Parse an expression whose binary operators bind at least as tightly
    /// as `min`.
    fn parse_precedence(&mut self, min: Precedence) -> ParseResult<NodeId> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = BinOp::from_token(&self.current.kind) {
            if prec < min {
                break;
            }
            self.advance();
            self.keep(lhs);
            let rhs = self.parse_precedence(prec.next())?;
            self.unkeep(lhs);
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn is_float(&self, n: NodeId) -> bool {
        self.code.types.is_float(self.ty(n))
    }

    /// Widen an int operand for a float operation.
    fn to_float(&mut self, n: NodeId) -> NodeId {
        if self.is_float(n) {
            n
        } else {
            self.peep(Op::ToFloat, &[None, Some(n)])
        }
    }

    fn binary(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let float = matches!(
            op,
            BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
        ) && (self.is_float(lhs) || self.is_float(rhs));
        let (lhs, rhs) = if float {
            self.keep(rhs);
            let l = self.to_float(lhs);
            self.keep(l);
            let r = self.to_float(rhs);
            self.unkeep(l);
            self.unkeep(rhs);
            (l, r)
        } else {
            (lhs, rhs)
        };
        let pick = |int: Op, flt: Op| if float { flt } else { int };
        let (node, swap, negate) = match op {
            BinOp::Add => (pick(Op::Add, Op::AddF), false, false),
            BinOp::Sub => (pick(Op::Sub, Op::SubF), false, false),
            BinOp::Mul => (pick(Op::Mul, Op::MulF), false, false),
            BinOp::Div => (pick(Op::Div, Op::DivF), false, false),
            BinOp::And => (Op::And, false, false),
            BinOp::Or => (Op::Or, false, false),
            BinOp::Xor => (Op::Xor, false, false),
            BinOp::Shl => (Op::Shl, false, false),
            BinOp::Sar => (Op::Sar, false, false),
            BinOp::Shr => (Op::Shr, false, false),
            BinOp::Eq => (pick(Op::Eq, Op::EqF), false, false),
            BinOp::Ne => (pick(Op::Eq, Op::EqF), false, true),
            BinOp::Lt => (pick(Op::Lt, Op::LtF), false, false),
            BinOp::Le => (pick(Op::Le, Op::LeF), false, false),
            BinOp::Gt => (pick(Op::Lt, Op::LtF), true, false),
            BinOp::Ge => (pick(Op::Le, Op::LeF), true, false),
        };
        let (a, b) = if swap { (rhs, lhs) } else { (lhs, rhs) };
        let n = self.peep(node, &[None, Some(a), Some(b)]);
        if negate {
            self.peep(Op::Not, &[None, Some(n)])
        } else {
            n
        }
    }

    fn parse_unary(&mut self) -> ParseResult<NodeId> {
        if self.match_token(&TokenKind::Minus) {
            let e = self.parse_unary()?;
            let op = if self.is_float(e) { Op::MinusF } else { Op::Minus };
            return Ok(self.peep(op, &[None, Some(e)]));
        }
        if self.match_token(&TokenKind::Bang) {
            let e = self.parse_unary()?;
            return Ok(self.peep(Op::Not, &[None, Some(e)]));
        }
        self.parse_postfix()
    }

    // =========================================================================
    // Postfix: field access, field store, call
    // =========================================================================

    fn parse_postfix(&mut self) -> ParseResult<NodeId> {
        let mut e = self.parse_primary()?;
        loop {
            if self.match_token(&TokenKind::Dot) {
                let name = self.expect_identifier()?;
                e = self.parse_field(e, &name)?;
            } else if self.check(&TokenKind::LParen) {
                e = self.parse_call(e)?;
            } else {
                return Ok(e);
            }
        }
    }

    /// `ptr.name` or `ptr.name = expr`.
    fn parse_field(&mut self, ptr: NodeId, name: &str) -> ParseResult<NodeId> {
        let pt = self.ty(ptr);
        let types = &self.code.types;
        let Some(st) = types.pointee(pt) else {
            return Err(ParseError::NotAStruct(types.show(pt)));
        };
        let Some((_, field)) = st.field(name) else {
            let ty = if st.name.starts_with('$') {
                types.show(pt)
            } else {
                st.name.to_string()
            };
            return Err(ParseError::UnknownField {
                field: name.to_string(),
                ty,
            });
        };
        let (fty, alias, is_final) = (field.ty, field.alias, field.is_final);
        let read_only = types.is_ro(pt);
        let label: Rc<str> = Rc::from(name);

        if self.match_token(&TokenKind::Assign) {
            if is_final || read_only {
                return Err(ParseError::FinalMutation(format!("field '{name}'")));
            }
            self.keep(ptr);
            let val = self.parse_expression()?;
            self.unkeep(ptr);
            let val = self.coerce(val, fty)?;
            let mem = self.mem();
            let st = self.peep(
                Op::Store { name: label, alias },
                &[None, Some(mem), Some(ptr), Some(val)],
            );
            self.set_mem(st);
            return Ok(val);
        }

        let decl = self.types().glb(fty);
        let mem = self.mem();
        Ok(self.peep(
            Op::Load {
                name: label,
                alias,
                decl,
            },
            &[None, Some(mem), Some(ptr)],
        ))
    }

    /// `fptr(args..)`.
    fn parse_call(&mut self, fptr: NodeId) -> ParseResult<NodeId> {
        let line = self.current.line;
        self.advance();
        self.keep(fptr);
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let a = self.parse_expression()?;
                self.keep(a);
                args.push(a);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        for &a in &args {
            self.unkeep(a);
        }
        self.unkeep(fptr);

        let ft = self.ty(fptr);
        if let Some(n) = self.code.types.fun_args(ft).map(<[TypeId]>::len) {
            if n != args.len() {
                return Err(ParseError::syntax(
                    format!("{n} arguments"),
                    args.len().to_string(),
                    line,
                ));
            }
        }

        let (ctrl, mem) = (self.ctrl(), self.mem());
        let mut inputs = vec![Some(ctrl), Some(mem)];
        inputs.extend(args.iter().map(|&a| Some(a)));
        inputs.push(Some(fptr));
        let call = self.peep(Op::Call, &inputs);
        self.keep(call);
        let end = self.peep(Op::CallEnd, &[Some(call)]);
        self.keep(end);
        let c = self.peep(
            Op::CProj {
                idx: 0,
                label: Rc::from("$ctrl"),
            },
            &[Some(end)],
        );
        self.set_ctrl(c);
        let m = self.peep(
            Op::Proj {
                idx: 1,
                label: Rc::from("$mem"),
            },
            &[Some(end)],
        );
        self.set_mem(m);
        let ret = self.peep(
            Op::Proj {
                idx: 2,
                label: Rc::from("$ret"),
            },
            &[Some(end)],
        );
        self.release(end);
        self.release(call);
        Ok(ret)
    }

    // =========================================================================
    // Primaries
    // =========================================================================

    fn parse_primary(&mut self) -> ParseResult<NodeId> {
        let t = match &self.current.kind {
            TokenKind::Int(v) => {
                let v = *v;
                self.advance();
                self.code.types.int_con(v)
            }
            TokenKind::Float(v) => {
                let v = *v;
                self.advance();
                self.code.types.float_con(v)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                self.code.types.one
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                self.code.types.zero
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                self.code.types.nil
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(e);
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                return self.parse_new();
            }
            TokenKind::LBrace => return self.parse_function(),
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                return self.lookup_value(&name);
            }
            _ => return Err(self.error_at_current("an expression")),
        };
        Ok(self.con(t))
    }

    /// Value of a name. Names of enclosing functions are visible inside a
    /// function literal only when they are final constants.
    fn lookup_value(&mut self, name: &str) -> ParseResult<NodeId> {
        if let Some(v) = self
            .scope
            .lookup(name)
            .and_then(|idx| self.scope.get(&self.code.graph, idx))
        {
            return Ok(v);
        }
        for outer in self.outer.iter().rev() {
            let Some(idx) = outer.lookup(name) else {
                continue;
            };
            if let Some(v) = outer.get(&self.code.graph, idx) {
                if outer.var(idx).is_final && matches!(self.code.graph.op(v), Op::Con(_)) {
                    return Ok(v);
                }
            }
            break;
        }
        Err(ParseError::UndefinedName(name.to_string()))
    }

    /// `new S`, the `new` already consumed.
    fn parse_new(&mut self) -> ParseResult<NodeId> {
        let line = self.current.line;
        let name: Rc<str> = Rc::from(self.expect_identifier()?);
        let Some(&ptr) = self.type_names.get(&name) else {
            return Err(ParseError::UndefinedName(name.to_string()));
        };
        if self.forward.contains(&name) || self.pending.contains(&name) {
            return Err(ParseError::syntax("a declared struct", name.to_string(), line));
        }
        let Some(inits) = self.inits.get(&name).cloned() else {
            return Err(ParseError::syntax("a struct name", name.to_string(), line));
        };
        let top = self.code.types.top;
        if inits.iter().any(|&i| self.ty(i) == top) {
            return Err(ParseError::NotInitialized(name.to_string()));
        }

        let mem = self.mem();
        let mut inputs = vec![None, Some(mem)];
        inputs.extend(inits.iter().map(|&i| Some(i)));
        let alloc = self.peep(Op::New(ptr), &inputs);
        self.keep(alloc);
        let m = self.peep(
            Op::Proj {
                idx: 0,
                label: Rc::from("$mem"),
            },
            &[Some(alloc)],
        );
        self.set_mem(m);
        let p = self.peep(Op::Proj { idx: 1, label: name }, &[Some(alloc)]);
        self.unkeep(alloc);
        Ok(p)
    }

    // =========================================================================
    // Function Literals
    // =========================================================================

    /// `{ T a, T b -> body }`. The body runs in a scope of its own; the
    /// value of its last expression statement is returned when control
    /// falls off the end.
    fn parse_function(&mut self) -> ParseResult<NodeId> {
        self.advance();
        let mut params: Vec<(TypeId, String)> = Vec::new();
        if !self.check(&TokenKind::Arrow) {
            loop {
                let Some(t) = self.parse_type()? else {
                    return Err(self.error_at_current("a parameter type"));
                };
                let name = self.expect_identifier()?;
                params.push((t, name));
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Arrow)?;

        let fidx = self.next_fidx;
        self.next_fidx += 1;
        let arg_tys: Vec<TypeId> = params.iter().map(|(t, _)| *t).collect();
        let bottom = self.code.types.bottom;
        let provisional = self.code.types.sig_tuple(bottom, &arg_tys);
        let fname: Rc<str> = Rc::from(format!("fun{fidx}"));
        let entry = self.entry;
        let fun = self.peep(
            Op::Fun {
                fidx,
                name: fname.clone(),
                sig: provisional,
            },
            &[None, Some(entry)],
        );

        let inner = super::Scope::new(&mut self.code.graph, &self.code.types);
        let enclosing = std::mem::replace(&mut self.scope, inner);
        self.outer.push(enclosing);
        let saved_last = self.last_expr.take();
        let saved_loop = (
            self.break_scope.take(),
            self.continue_scope.take(),
            std::mem::take(&mut self.loop_depth),
        );
        self.returns.push(Vec::new());

        self.set_ctrl(fun);
        let mem_bot = self.code.types.mem_bot;
        let mem = self.peep(
            Op::Parm {
                idx: 1,
                label: Rc::from("$mem"),
                min: mem_bot,
            },
            &[Some(fun)],
        );
        self.set_mem(mem);
        self.scope.push();
        for (i, (t, name)) in params.iter().enumerate() {
            let parm = self.peep(
                Op::Parm {
                    idx: 2 + i as u32,
                    label: Rc::from(name.as_str()),
                    min: *t,
                },
                &[Some(fun)],
            );
            if !self.scope.define(&mut self.code.graph, name, *t, false, parm) {
                return Err(ParseError::Redefinition(name.clone()));
            }
        }

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.parse_statement()?;
        }
        self.expect(&TokenKind::RBrace)?;
        if !self.is_dead_ctrl() {
            let val = match self.last_expr {
                Some(v) => v,
                None => {
                    let zero = self.code.types.zero;
                    self.con(zero)
                }
            };
            self.emit_return(val);
        }
        self.set_last(None);
        self.last_expr = saved_last;
        (self.break_scope, self.continue_scope, self.loop_depth) = saved_loop;

        let rets = self.returns.pop().unwrap_or_default();
        let ret = rets
            .into_iter()
            .reduce(|a, b| self.code.types.meet(a, b))
            .map_or(bottom, |t| self.code.types.glb(t));
        let sig = self.code.types.sig_tuple(ret, &arg_tys);
        self.code.graph.node_mut(fun).op = Op::Fun {
            fidx,
            name: fname,
            sig,
        };
        log::debug!("parsed function #{fidx}: {}", self.code.types.show(sig));

        let inner = match self.outer.pop() {
            Some(enclosing) => std::mem::replace(&mut self.scope, enclosing),
            None => return Err(ParseError::syntax("'}'", "end of function", self.current.line)),
        };
        inner.kill(&mut self.code.graph);

        let con = self.code.types.fun_con(sig, fidx);
        Ok(self.con(con))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use sonic_jit::{CodeGen, CodeGenConfig};

    fn printed(src: &str) -> String {
        let mut code = CodeGen::new(CodeGenConfig::default());
        parse(&mut code, src).unwrap();
        code.print()
    }

    fn parse_err(src: &str) -> String {
        let mut code = CodeGen::new(CodeGenConfig::default());
        parse(&mut code, src).unwrap_err().to_string()
    }

    #[test]
    fn test_precedence_ladder() {
        assert!(Precedence::Bitwise < Precedence::Comparison);
        assert!(Precedence::Shift < Precedence::Additive);
        assert_eq!(Precedence::Multiplicative.next(), Precedence::Unary);
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(printed("return 1+2*3;"), "return 7;");
        assert_eq!(printed("return (1+2)*3;"), "return 9;");
        assert_eq!(printed("return 10-4-3;"), "return 3;");
        assert_eq!(printed("return 1 << 2 + 1;"), "return 8;");
        assert_eq!(printed("return 6 & 3 == 3;"), "return 0;");
    }

    #[test]
    fn test_comparisons_fold() {
        assert_eq!(printed("return 3 > 2;"), "return 1;");
        assert_eq!(printed("return 2 >= 3;"), "return 0;");
        assert_eq!(printed("return 1 != 1;"), "return 0;");
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(printed("return 1 + 0.5;"), "return 1.5;");
        assert_eq!(printed("return -2.5;"), "return -2.5;");
    }

    #[test]
    fn test_struct_alloc() {
        let src = "struct C { C? l; } C top = new C; return top;";
        assert_eq!(printed(src), "return C;");
    }

    #[test]
    fn test_field_errors() {
        assert_eq!(
            parse_err("return arg.x;"),
            "Expected a struct reference but got int"
        );
        assert_eq!(
            parse_err("struct S { int x; } S s = new S; return s.y;"),
            "Accessing unknown field 'y' from 'S'"
        );
    }

    #[test]
    fn test_final_field_store() {
        assert_eq!(
            parse_err("struct S { val x = 1; } S s = new S; s.x = 2;"),
            "Cannot modify final field 'x'"
        );
        assert_eq!(
            parse_err("struct S { int x; } val s = new S; s.x = 2;"),
            "Cannot modify final field 'x'"
        );
    }

    #[test]
    fn test_uninitialized_field() {
        assert_eq!(
            parse_err("struct S { int x; } struct T { S s; } T t = new T;"),
            "'T' is not fully initialized"
        );
    }

    #[test]
    fn test_function_literal_call() {
        let src = "val sq = { int x -> x*x; }; return sq(3);";
        let mut code = CodeGen::new(CodeGenConfig::default());
        parse(&mut code, src).unwrap();
        assert!(code.print().contains("return (x*x);"));
    }

    #[test]
    fn test_call_arity() {
        assert_eq!(
            parse_err("val f = { int x -> x; }; return f(1, 2);"),
            "Syntax error, expected 1 arguments: 2 (line 1)"
        );
    }

    #[test]
    fn test_outer_mutable_not_visible_in_function() {
        assert_eq!(
            parse_err("int a = arg; val f = { -> a; }; return f();"),
            "Undefined name 'a'"
        );
    }
}
