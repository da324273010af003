//! Statement parsing.
//!
//! ```text
//! statement  := 'return' expr ';'
//!             | 'if' '(' expr ')' statement ('else' statement)?
//!             | 'while' '(' expr ')' statement
//!             | 'for' '(' declaration? ';' expr? ';' assignment? ')' statement
//!             | 'break' ';' | 'continue' ';'
//!             | 'struct' NAME '{' declaration* '}' ';'?
//!             | '{' statement* '}'
//!             | ';'
//!             | declaration ';'
//!             | NAME '=' expr ';'
//!             | expr ';'
//! declaration:= ('var' | 'val' | type '!'?) NAME ('=' expr)?
//! ```

use super::{Parser, Scope};
use crate::token::{Keyword, TokenKind};
use sonic_jit::{NodeId, Op, ParseError, ParseResult, TypeId};
use std::rc::Rc;

/// How a declaration got its type.
#[derive(Debug, Clone, Copy)]
enum DeclKind {
    /// `var x = e`: mutable, typed by the initializer.
    Var,
    /// `val x = e`: final, typed by the initializer.
    Val,
    /// `T x` or `T !x`: mutable with a declared type.
    Typed(TypeId),
}

impl<'src, 'c> Parser<'src, 'c> {
    /// Parse a single statement.
    pub(super) fn parse_statement(&mut self) -> ParseResult<()> {
        match &self.current.kind {
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Break) => self.parse_break(),
            TokenKind::Keyword(Keyword::Continue) => self.parse_continue(),
            TokenKind::Keyword(Keyword::Struct) => self.parse_struct(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Semi => {
                self.advance();
                Ok(())
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_return(&mut self) -> ParseResult<()> {
        self.advance();
        let val = self.parse_expression()?;
        self.expect(&TokenKind::Semi)?;
        self.emit_return(val);
        self.set_last(None);
        Ok(())
    }

    fn parse_block(&mut self) -> ParseResult<()> {
        self.advance();
        self.scope.push();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.parse_statement()?;
        }
        self.expect(&TokenKind::RBrace)?;
        self.scope.pop(&mut self.code.graph);
        self.set_last(None);
        Ok(())
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// Split control on `pred` at the current point; returns the kept true
    /// and false projections.
    fn branch(&mut self, pred: NodeId) -> (NodeId, NodeId) {
        let ctrl = self.ctrl();
        let iff = self.peep(Op::If, &[Some(ctrl), Some(pred)]);
        self.keep(iff);
        let t = self.peep(
            Op::CProj {
                idx: 0,
                label: Rc::from("True"),
            },
            &[Some(iff)],
        );
        self.keep(t);
        let f = self.peep(
            Op::CProj {
                idx: 1,
                label: Rc::from("False"),
            },
            &[Some(iff)],
        );
        self.keep(f);
        self.release(iff);
        (t, f)
    }

    fn parse_if(&mut self) -> ParseResult<()> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        let pred = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        self.keep(pred);

        let (t, f) = self.branch(pred);
        let ndefs = self.scope.len();
        let false_scope = self.scope.dup(&mut self.code.graph, &mut self.code.types, None);

        self.set_ctrl(t);
        self.unkeep(t);
        self.scope
            .upcast(&mut self.code.graph, &mut self.code.types, t, pred, false);
        self.parse_statement()?;
        let true_scope = std::mem::replace(&mut self.scope, false_scope);

        self.set_ctrl(f);
        self.unkeep(f);
        self.scope
            .upcast(&mut self.code.graph, &mut self.code.types, f, pred, true);
        if self.match_keyword(Keyword::Else) {
            self.parse_statement()?;
        }
        self.release(pred);

        for side in [&true_scope, &self.scope] {
            if side.len() != ndefs {
                return Err(ParseError::BranchOnlyDefinition(
                    side.var(ndefs).name.to_string(),
                ));
            }
        }
        let false_scope = std::mem::replace(&mut self.scope, true_scope);
        self.scope
            .merge(&mut self.code.graph, &mut self.code.types, false_scope);
        self.set_last(None);
        Ok(())
    }

    fn parse_while(&mut self) -> ParseResult<()> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        self.parse_loop(false)
    }

    /// `for (init; test; next) body` runs as `{ init; while (test) { body
    /// next } }`, with `continue` landing on `next`.
    fn parse_for(&mut self) -> ParseResult<()> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        self.scope.push();
        if !self.match_token(&TokenKind::Semi) {
            self.parse_expression_statement()?;
        }
        self.parse_loop(true)?;
        self.scope.pop(&mut self.code.graph);
        Ok(())
    }

    /// Loop body shared by `while` and `for`; the opening parenthesis is
    /// already consumed.
    fn parse_loop(&mut self, is_for: bool) -> ParseResult<()> {
        let saved_break = self.break_scope.take();
        let saved_continue = self.continue_scope.take();
        let saved_depth = self.loop_depth;

        let entry = self.ctrl();
        let head = self.peep(Op::Loop, &[None, Some(entry), None]);
        self.set_ctrl(head);
        let body = self
            .scope
            .dup(&mut self.code.graph, &mut self.code.types, Some(head));
        let mut head_scope = std::mem::replace(&mut self.scope, body);

        let pred = if is_for && self.check(&TokenKind::Semi) {
            let one = self.code.types.one;
            self.con(one)
        } else {
            self.parse_expression()?
        };
        self.expect(if is_for { &TokenKind::Semi } else { &TokenKind::RParen })?;
        self.keep(pred);

        // The step expression is parsed after the body.
        let step = if is_for {
            let mark = self.save();
            self.skip_to_close_paren()?;
            self.expect(&TokenKind::RParen)?;
            Some(mark)
        } else {
            None
        };

        let (t, f) = self.branch(pred);
        let exit = self.scope.dup(&mut self.code.graph, &mut self.code.types, None);
        exit.set_ctrl(&mut self.code.graph, f);
        self.unkeep(f);
        self.break_scope = Some(exit);
        self.loop_depth = self.scope.depth();

        self.set_ctrl(t);
        self.unkeep(t);
        self.scope
            .upcast(&mut self.code.graph, &mut self.code.types, t, pred, false);
        self.release(pred);
        self.parse_statement()?;

        if let Some(cont) = self.continue_scope.take() {
            let cont = self.jump_to(Some(cont));
            let body = std::mem::replace(&mut self.scope, cont);
            body.kill(&mut self.code.graph);
        }

        if let Some(mark) = step {
            let resume = self.save();
            self.restore(mark);
            if !self.check(&TokenKind::RParen) {
                let v = self.parse_assignment()?;
                self.set_last(Some(v));
            }
            if !self.check(&TokenKind::RParen) {
                return Err(self.error_at_current("')'"));
            }
            self.restore(resume);
        }

        let exit = self
            .break_scope
            .take()
            .ok_or(ParseError::NoActiveLoop)?;
        let back = std::mem::replace(&mut self.scope, exit);
        head_scope.end_loop(&mut self.code.graph, &mut self.code.types, back);
        head_scope.kill(&mut self.code.graph);

        self.break_scope = saved_break;
        self.continue_scope = saved_continue;
        self.loop_depth = saved_depth;
        self.set_last(None);
        Ok(())
    }

    /// Step over the rest of a parenthesized group, stopping at its `)`.
    fn skip_to_close_paren(&mut self) -> ParseResult<()> {
        let mut depth = 0u32;
        loop {
            match &self.current.kind {
                TokenKind::RParen if depth == 0 => return Ok(()),
                TokenKind::RParen => depth -= 1,
                TokenKind::LParen => depth += 1,
                TokenKind::Eof => return Err(self.error_at_current("')'")),
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_break(&mut self) -> ParseResult<()> {
        self.advance();
        let exit = self.break_scope.take().ok_or(ParseError::NoActiveLoop)?;
        let exit = self.jump_to(Some(exit));
        self.break_scope = Some(exit);
        self.expect(&TokenKind::Semi)?;
        self.set_last(None);
        Ok(())
    }

    fn parse_continue(&mut self) -> ParseResult<()> {
        self.advance();
        if self.break_scope.is_none() {
            return Err(ParseError::NoActiveLoop);
        }
        let cont = self.continue_scope.take();
        let cont = self.jump_to(cont);
        self.continue_scope = Some(cont);
        self.expect(&TokenKind::Semi)?;
        self.set_last(None);
        Ok(())
    }

    /// Leave the current path for `to`: a copy of the current scope,
    /// trimmed to the blocks open at the loop head, is merged into `to`
    /// (or becomes it). Code after the jump is dead.
    fn jump_to(&mut self, to: Option<Scope>) -> Scope {
        let mut cur = self.scope.dup(&mut self.code.graph, &mut self.code.types, None);
        let xctrl = self.code.types.xctrl;
        let dead = self.con(xctrl);
        self.set_ctrl(dead);
        while cur.depth() > self.loop_depth {
            cur.pop(&mut self.code.graph);
        }
        match to {
            Some(mut to) => {
                to.merge(&mut self.code.graph, &mut self.code.types, cur);
                to
            }
            None => cur,
        }
    }

    // =========================================================================
    // Structs
    // =========================================================================

    fn parse_struct(&mut self) -> ParseResult<()> {
        let line = self.current.line;
        self.advance();
        if !self.outer.is_empty() || self.struct_depth > 0 || self.scope.depth() > 1 {
            return Err(ParseError::syntax(
                "a top-level struct declaration",
                "a nested struct",
                line,
            ));
        }
        let name: Rc<str> = Rc::from(self.expect_identifier()?);
        if self.type_names.contains_key(&name) && !self.forward.remove(&name) {
            return Err(ParseError::Redefinition(name.to_string()));
        }
        let sid = self.code.types.declare_struct(&name);
        let ptr = self.code.types.ptr(2, sid);
        self.type_names.insert(name.clone(), ptr);
        if !self.structs.contains(&name) {
            self.structs.push(name.clone());
        }

        self.expect(&TokenKind::LBrace)?;
        self.scope.push();
        self.struct_depth += 1;
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.parse_statement()?;
        }
        self.struct_depth -= 1;
        self.expect(&TokenKind::RBrace)?;
        self.match_token(&TokenKind::Semi);

        let mut inits = Vec::new();
        for (var, val) in self.scope.innermost(&self.code.graph) {
            self.code
                .types
                .add_field(sid, &var.name, var.ty, var.is_final);
            let init = match val {
                Some(v) => v,
                None => {
                    let top = self.code.types.top;
                    self.con(top)
                }
            };
            self.keep(init);
            inits.push(init);
        }
        self.scope.pop(&mut self.code.graph);
        self.inits.insert(name.clone(), inits);

        match self.code.types.close_struct(sid) {
            Some(_) => {
                // The whole recursive group is now installed.
                self.pending.clear();
                for s in &self.structs {
                    if let Some(id) = self.code.types.lookup_struct(s) {
                        let ptr = self.code.types.ptr(2, id);
                        self.type_names.insert(s.clone(), ptr);
                    }
                }
                log::debug!("struct {name} installed");
            }
            None => {
                self.pending.insert(name);
            }
        }
        self.set_last(None);
        Ok(())
    }

    // =========================================================================
    // Declarations and Assignment
    // =========================================================================

    fn parse_expression_statement(&mut self) -> ParseResult<()> {
        let val = if self.match_keyword(Keyword::Var) {
            self.parse_declaration(DeclKind::Var)?
        } else if self.match_keyword(Keyword::Val) {
            self.parse_declaration(DeclKind::Val)?
        } else if let Some(t) = self.parse_decl_type()? {
            self.parse_declaration(DeclKind::Typed(t))?
        } else {
            self.parse_assignment()?
        };
        self.expect(&TokenKind::Semi)?;
        self.set_last(Some(val));
        Ok(())
    }

    /// The rest of a declaration, after its type or `var`/`val`.
    fn parse_declaration(&mut self, kind: DeclKind) -> ParseResult<NodeId> {
        if let DeclKind::Typed(_) = kind {
            // `T !x` spells out the default: typed bindings are mutable.
            self.match_token(&TokenKind::Bang);
        }
        let name = self.expect_identifier()?;

        let init = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let (ty, is_final, val) = match (kind, init) {
            (DeclKind::Typed(t), Some(e)) => (t, false, self.coerce(e, t)?),
            (DeclKind::Typed(t), None) => {
                let zero = self.default_value(t);
                (t, false, self.con(zero))
            }
            (DeclKind::Var | DeclKind::Val, Some(e)) => {
                let et = self.ty(e);
                let t = self.code.types.glb(et);
                (t, matches!(kind, DeclKind::Val), e)
            }
            (DeclKind::Var | DeclKind::Val, None) => {
                return Err(self.error_at_current("'='"));
            }
        };

        let (ty, val) = if is_final && self.code.types.is_ptr(ty) {
            let ro = self.code.types.make_ro(ty);
            (ro, self.peep(Op::ReadOnly, &[None, Some(val)]))
        } else {
            (ty, val)
        };

        if !self
            .scope
            .define(&mut self.code.graph, &name, ty, is_final, val)
        {
            return Err(ParseError::Redefinition(name));
        }
        Ok(val)
    }

    /// Initial value of a declaration without an initializer. A non-null
    /// pointer has none, which `new` reports for struct fields.
    fn default_value(&mut self, t: TypeId) -> TypeId {
        let types = self.types();
        match types.ptr_parts(t) {
            Some((nil, _)) if nil < 3 => types.top,
            _ => types.make_zero(t),
        }
    }

    /// `NAME = expr`, or a plain expression.
    fn parse_assignment(&mut self) -> ParseResult<NodeId> {
        let name = match &self.current.kind {
            TokenKind::Ident(name) if matches!(self.peek_next(), TokenKind::Assign) => name.clone(),
            _ => return self.parse_expression(),
        };
        self.advance();
        self.advance();

        let Some(idx) = self.scope.lookup(&name) else {
            return Err(ParseError::UndefinedName(name));
        };
        let var = self.scope.var(idx).clone();
        if var.is_final {
            return Err(ParseError::FinalMutation(format!("'{name}'")));
        }
        let val = self.parse_expression()?;
        let val = self.coerce(val, var.ty)?;
        self.scope.update(&mut self.code.graph, idx, val);
        Ok(val)
    }

    /// Convert `val` for storing into a slot of declared type `t`: widen
    /// ints to float, wrap ints into narrow ranges, then check the type.
    pub(super) fn coerce(&mut self, val: NodeId, t: TypeId) -> ParseResult<NodeId> {
        let vt = self.ty(val);
        let val = if self.code.types.is_int(vt) && self.code.types.is_float(t) {
            self.peep(Op::ToFloat, &[None, Some(val)])
        } else {
            val
        };
        let val = self.zs_mask(val, t);
        let vt = self.ty(val);
        let open_target = self
            .code
            .types
            .ptr_parts(t)
            .is_some_and(|(_, obj)| self.code.types.is_open(obj));
        if !open_target && !self.code.types.isa(vt, t) {
            let types = &self.code.types;
            return Err(ParseError::mismatch(types.show(vt), types.show(t)));
        }
        Ok(val)
    }

    /// Zero- or sign-extend an int into a narrow declared range.
    fn zs_mask(&mut self, val: NodeId, t: TypeId) -> NodeId {
        let vt = self.ty(val);
        let (Some((lo, hi)), Some(_)) = (
            self.code.types.int_range(t),
            self.code.types.int_range(vt),
        ) else {
            return val;
        };
        if self.code.types.isa(vt, t) {
            return val;
        }
        if lo == 0 {
            let mask = self.code.types.int_con(hi);
            let mask = self.con(mask);
            return self.peep(Op::And, &[None, Some(val), Some(mask)]);
        }
        let shift = i64::from(hi.leading_zeros()) - 1;
        let shift = self.code.types.int_con(shift);
        let shift = self.con(shift);
        self.keep(shift);
        let shl = self.peep(Op::Shl, &[None, Some(val), Some(shift)]);
        let sar = self.peep(Op::Sar, &[None, Some(shl), Some(shift)]);
        self.unkeep(shift);
        sar
    }
}
