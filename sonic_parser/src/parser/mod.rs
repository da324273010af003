//! Recursive descent parser that builds a Sea-of-Nodes graph directly.
//!
//! There is no AST: every expression becomes graph nodes the moment it is
//! parsed, and every new node is peepholed as it is created. Statements
//! thread control and memory through the current [`Scope`]; branches and
//! loops split and merge scopes.

mod expr;
mod scope;
mod stmt;
mod types;

use crate::lexer::Lexer;
use crate::token::{Keyword, Token, TokenKind};
use rustc_hash::{FxHashMap, FxHashSet};
use scope::Scope;
use sonic_jit::{CodeGen, NodeId, Op, ParseError, ParseResult, TypeId, Types};
use std::rc::Rc;

pub use expr::Precedence;

// =============================================================================
// Parser Core
// =============================================================================

/// Graph-building parser for one compilation unit.
pub struct Parser<'src, 'c> {
    /// Lexer for tokenization.
    lexer: Lexer<'src>,
    /// Current token.
    current: Token,
    /// Session the graph is built in.
    code: &'c mut CodeGen,
    /// Names, control and memory of the code being parsed.
    scope: Scope,
    /// Scopes of the enclosing functions while a function literal is parsed.
    outer: Vec<Scope>,
    /// Control projection out of Start; main and every function hang off it.
    entry: NodeId,
    /// Primitive type names and declared structs (as non-null pointers).
    type_names: FxHashMap<Rc<str>, TypeId>,
    /// Declared struct names, in declaration order.
    structs: Vec<Rc<str>>,
    /// Structs referenced inside a struct body before their declaration.
    forward: FxHashSet<Rc<str>>,
    /// Structs closed while a forward reference keeps their group open.
    pending: FxHashSet<Rc<str>>,
    /// Field initializers per struct, kept alive for every `new`.
    inits: FxHashMap<Rc<str>, Vec<NodeId>>,
    /// Nesting depth of struct bodies.
    struct_depth: u32,
    /// Types of the values returned so far, one list per open function.
    returns: Vec<Vec<TypeId>>,
    /// Value of the last expression statement; a function body's result
    /// when it has no explicit `return`.
    last_expr: Option<NodeId>,
    /// Exit scope of the innermost loop; every `break` merges into it.
    break_scope: Option<Scope>,
    /// Merge of the `continue`s seen so far in the innermost loop.
    continue_scope: Option<Scope>,
    /// Lexical depth of the innermost loop head.
    loop_depth: usize,
    next_fidx: u32,
}

/// Lexer position to backtrack to.
#[derive(Clone)]
struct Mark<'src> {
    lexer: Lexer<'src>,
    current: Token,
}

/// Parse `source` into the graph of `code` and mark the parse phase done.
pub fn parse(code: &mut CodeGen, source: &str) -> ParseResult<()> {
    let mut parser = Parser::new(code, source);
    parser.parse_program()?;
    parser.finish();
    Ok(())
}

impl<'src, 'c> Parser<'src, 'c> {
    /// Create a parser building into `code`.
    pub fn new(code: &'c mut CodeGen, source: &'src str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let scope = Scope::new(&mut code.graph, &code.types);
        let start = code.graph.start;
        let entry = code.graph.new_node(
            &mut code.types,
            Op::CProj {
                idx: 0,
                label: Rc::from("$ctrl"),
            },
            &[Some(start)],
        );
        code.graph.keep(entry);
        let type_names = builtin_types(&mut code.types);
        Self {
            lexer,
            current,
            code,
            scope,
            outer: Vec::new(),
            entry,
            type_names,
            structs: Vec::new(),
            forward: FxHashSet::default(),
            pending: FxHashSet::default(),
            inits: FxHashMap::default(),
            struct_depth: 0,
            returns: Vec::new(),
            last_expr: None,
            break_scope: None,
            continue_scope: None,
            loop_depth: 0,
            next_fidx: 1,
        }
    }

    /// Parse the whole program as the body of `main(arg)`.
    pub fn parse_program(&mut self) -> ParseResult<()> {
        let start = self.code.graph.start;
        self.scope.set_ctrl(&mut self.code.graph, self.entry);
        let mem = self.peep(
            Op::Proj {
                idx: 1,
                label: Rc::from("$mem"),
            },
            &[Some(start)],
        );
        self.set_mem(mem);
        let arg_ty = {
            let st = self.code.graph.ty(start);
            self.code.types.tuple_at(st, 2)
        };
        let arg = self.peep(
            Op::Proj {
                idx: 2,
                label: Rc::from("arg"),
            },
            &[Some(start)],
        );
        self.scope.push();
        self.scope.define(&mut self.code.graph, "arg", arg_ty, false, arg);
        self.returns.push(Vec::new());

        while !self.is_at_end() {
            self.parse_statement()?;
        }

        if !self.is_dead_ctrl() {
            let zero = self.code.types.zero;
            let z = self.con(zero);
            self.emit_return(z);
        }
        if let Some(name) = self.forward.iter().next() {
            return Err(ParseError::UndefinedName(name.to_string()));
        }
        self.set_last(None);
        Ok(())
    }

    /// Release parser-held nodes and hand the graph to the optimizer.
    fn finish(self) {
        let Parser {
            code,
            scope,
            entry,
            inits,
            ..
        } = self;
        scope.kill(&mut code.graph);
        for n in inits.into_values().flatten() {
            code.graph.unkeep(n);
            if code.graph.is_unused(n) {
                code.graph.kill(n);
            }
        }
        code.graph.unkeep(entry);
        if code.graph.is_unused(entry) {
            code.graph.kill(entry);
        }
        let stop = code.graph.stop;
        code.graph.peephole(&mut code.types, stop);
        code.finish_parse();
    }

    // =========================================================================
    // Token Management
    // =========================================================================

    /// Advance to the next token, returning the previous.
    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    /// Check if the current token matches the given kind.
    #[inline]
    fn check(&self, kind: &TokenKind) -> bool {
        self.current.kind.same_kind(kind)
    }

    /// Check if the current token is a specific keyword.
    #[inline]
    fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.current.kind, TokenKind::Keyword(k) if *k == kw)
    }

    /// Consume the current token if it matches, otherwise return false.
    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume the current token if it's the given keyword.
    fn match_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect and consume a specific token, or error.
    fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(&format!("'{kind}'")))
        }
    }

    /// Expect and consume an identifier, returning the name.
    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Ident(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_at_current("an identifier"))
        }
    }

    /// Kind of the token after the current one.
    fn peek_next(&self) -> TokenKind {
        self.lexer.clone().next_token().kind
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        self.current.is_eof()
    }

    fn save(&self) -> Mark<'src> {
        Mark {
            lexer: self.lexer.clone(),
            current: self.current.clone(),
        }
    }

    fn restore(&mut self, mark: Mark<'src>) {
        self.lexer = mark.lexer;
        self.current = mark.current;
    }

    /// Syntax error at the current token.
    fn error_at_current(&self, expected: &str) -> ParseError {
        let found = match &self.current.kind {
            TokenKind::Eof => "end of input".to_string(),
            kind => kind.to_string(),
        };
        ParseError::syntax(expected, found, self.current.line)
    }

    // =========================================================================
    // Graph Helpers
    // =========================================================================

    /// Create and peephole a node.
    fn peep(&mut self, op: Op, inputs: &[Option<NodeId>]) -> NodeId {
        let CodeGen { graph, types, .. } = &mut *self.code;
        graph.new_node(types, op, inputs)
    }

    fn con(&mut self, t: TypeId) -> NodeId {
        let CodeGen { graph, types, .. } = &mut *self.code;
        graph.con(types, t)
    }

    #[inline]
    fn ty(&self, n: NodeId) -> TypeId {
        self.code.graph.ty(n)
    }

    #[inline]
    fn types(&mut self) -> &mut Types {
        &mut self.code.types
    }

    fn keep(&mut self, n: NodeId) {
        self.code.graph.keep(n);
    }

    /// Drop a hold on `n`, killing it if nothing else uses it.
    fn release(&mut self, n: NodeId) {
        let g = &mut self.code.graph;
        g.unkeep(n);
        if g.is_unused(n) && !g.is_dead(n) {
            g.kill(n);
        }
    }

    fn unkeep(&mut self, n: NodeId) {
        self.code.graph.unkeep(n);
    }

    fn ctrl(&self) -> NodeId {
        self.scope.ctrl(&self.code.graph)
    }

    fn set_ctrl(&mut self, c: NodeId) {
        self.scope.set_ctrl(&mut self.code.graph, c);
    }

    fn mem(&self) -> NodeId {
        self.scope.mem(&self.code.graph)
    }

    fn set_mem(&mut self, m: NodeId) {
        self.scope.set_mem(&mut self.code.graph, m);
    }

    /// True once control cannot reach the current point.
    fn is_dead_ctrl(&self) -> bool {
        self.ty(self.ctrl()) == self.code.types.xctrl
    }

    /// Replace the remembered last expression value.
    fn set_last(&mut self, n: Option<NodeId>) {
        if let Some(n) = n {
            self.keep(n);
        }
        if let Some(old) = std::mem::replace(&mut self.last_expr, n) {
            self.release(old);
        }
    }

    /// Return `val` from the function being parsed; code after it is dead.
    fn emit_return(&mut self, val: NodeId) {
        let (ctrl, mem) = (self.ctrl(), self.mem());
        let vt = self.ty(val);
        let ret = self.peep(Op::Return, &[Some(ctrl), Some(mem), Some(val)]);
        if matches!(self.code.graph.op(ret), Op::Return) {
            let stop = self.code.graph.stop;
            self.code.graph.add_def(stop, Some(ret));
            if let Some(rets) = self.returns.last_mut() {
                rets.push(vt);
            }
        }
        let xctrl = self.code.types.xctrl;
        let dead = self.con(xctrl);
        self.set_ctrl(dead);
    }
}

/// Primitive type names.
fn builtin_types(types: &mut Types) -> FxHashMap<Rc<str>, TypeId> {
    let entries = [
        ("int", types.int_bot),
        ("i64", types.int_bot),
        ("i32", types.int(i32::MIN as i64, i32::MAX as i64)),
        ("i16", types.int(i16::MIN as i64, i16::MAX as i64)),
        ("i8", types.int(i8::MIN as i64, i8::MAX as i64)),
        ("u32", types.int(0, u32::MAX as i64)),
        ("u16", types.int(0, u16::MAX as i64)),
        ("u8", types.int(0, u8::MAX as i64)),
        ("bool", types.bool_ty),
        ("u1", types.bool_ty),
        ("flt", types.f64_ty),
        ("f64", types.f64_ty),
        ("f32", types.f32_ty),
    ];
    entries
        .into_iter()
        .map(|(name, t)| (Rc::from(name), t))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_jit::CodeGenConfig;

    fn parse_src(src: &str) -> ParseResult<CodeGen> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut code = CodeGen::new(CodeGenConfig::default());
        parse(&mut code, src)?;
        Ok(code)
    }

    fn printed(src: &str) -> String {
        parse_src(src).unwrap().print()
    }

    fn parse_err(src: &str) -> String {
        parse_src(src).unwrap_err().to_string()
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(printed("return 1+2*3+-5;"), "return 2;");
    }

    #[test]
    fn test_arg() {
        assert_eq!(printed("return arg;"), "return arg;");
        assert_eq!(printed("return arg+0;"), "return arg;");
    }

    #[test]
    fn test_if_merge() {
        let src = "int a=1; if (arg==1) a=2; else a=3; return a;";
        assert_eq!(printed(src), "return Phi(Region,2,3);");
    }

    #[test]
    fn test_implicit_return_zero() {
        assert_eq!(printed("int a = arg;"), "return 0;");
    }

    #[test]
    fn test_syntax_error() {
        assert_eq!(
            parse_err("return 1"),
            "Syntax error, expected ';': end of input (line 1)"
        );
        assert_eq!(
            parse_err("int a = 1; a = ;"),
            "Syntax error, expected an expression: ; (line 1)"
        );
    }

    #[test]
    fn test_undefined_and_redefined() {
        assert_eq!(parse_err("return b;"), "Undefined name 'b'");
        assert_eq!(parse_err("int a=1; int a=2;"), "Redefining name 'a'");
    }

    #[test]
    fn test_branch_only_definition() {
        assert_eq!(
            parse_err("if (arg) int b = 1; return 0;"),
            "Cannot define a 'b' on one arm of an if"
        );
    }

    #[test]
    fn test_final_reassignment() {
        assert_eq!(parse_err("val a = 1; a = 2;"), "Cannot modify final 'a'");
    }

    #[test]
    fn test_break_and_continue_need_a_loop() {
        let msg = "No active loop for a break or continue";
        assert_eq!(parse_err("break;"), msg);
        assert_eq!(parse_err("if (arg) continue; return 1;"), msg);
        // A function body starts outside any loop.
        assert_eq!(parse_err("while (arg) { val f = { -> break; }; }"), msg);
    }

    #[test]
    fn test_break_leaves_loop() {
        assert_eq!(printed("while (1) { break; } return 3;"), "return 3;");
        let src = "int i = 0; while (1) { if (i == arg) break; i = i + 1; } return i;";
        assert!(printed(src).contains("Loop"));
    }

    #[test]
    fn test_for_loop() {
        let src = "int sum = 0; for (int i = 0; i < arg; i = i + 1) { if (i == 2) continue; sum = sum + i; } return sum;";
        assert!(printed(src).contains("Loop"));
        assert_eq!(parse_err("for (int i = 0; i < 3; i = i + 1) ; return i;"), "Undefined name 'i'");
        assert_eq!(
            parse_err("for (;;"),
            "Syntax error, expected ')': end of input (line 1)"
        );
    }
}
