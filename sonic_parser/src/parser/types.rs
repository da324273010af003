//! Type syntax.
//!
//! ```text
//! type := NAME '?'?                      primitive or struct pointer
//!       | '{' type* '->' type '}' '?'?   function pointer
//! ```

use super::Parser;
use crate::token::TokenKind;
use sonic_jit::{ParseResult, TypeId};
use std::rc::Rc;

impl<'src, 'c> Parser<'src, 'c> {
    /// A type that starts a declaration, i.e. one followed by a name or `!`.
    /// Anything else rewinds and returns `None`.
    pub(super) fn parse_decl_type(&mut self) -> ParseResult<Option<TypeId>> {
        let mark = self.save();
        match self.parse_type()? {
            Some(t) if matches!(self.current.kind, TokenKind::Ident(_) | TokenKind::Bang) => {
                Ok(Some(t))
            }
            _ => {
                self.restore(mark);
                Ok(None)
            }
        }
    }

    /// Parse a type, or return `None` (with input partly consumed) if the
    /// tokens do not spell one.
    pub(super) fn parse_type(&mut self) -> ParseResult<Option<TypeId>> {
        let t = match &self.current.kind {
            TokenKind::Ident(name) => {
                let name: Rc<str> = Rc::from(name.as_str());
                match self.type_names.get(&name).copied() {
                    Some(t) => t,
                    None if self.is_forward_ref() => self.forward_ref(name),
                    None => return Ok(None),
                }
            }
            TokenKind::LBrace => match self.parse_fun_type()? {
                Some(t) => return Ok(Some(self.nullable(t))),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(self.nullable(t)))
    }

    /// A trailing `?` makes a pointer type nullable.
    fn nullable(&mut self, t: TypeId) -> TypeId {
        if self.match_token(&TokenKind::Question) {
            self.code.types.with_nil(t, 3)
        } else {
            t
        }
    }

    /// Inside a struct body an unknown name used as a field type names a
    /// struct declared later.
    fn is_forward_ref(&self) -> bool {
        self.struct_depth > 0
            && matches!(
                self.peek_next(),
                TokenKind::Ident(_) | TokenKind::Question | TokenKind::Bang
            )
    }

    fn forward_ref(&mut self, name: Rc<str>) -> TypeId {
        let sid = self.code.types.declare_struct(&name);
        let ptr = self.code.types.ptr(2, sid);
        log::trace!("forward reference to struct {name}");
        self.type_names.insert(name.clone(), ptr);
        self.structs.push(name.clone());
        self.forward.insert(name);
        ptr
    }

    /// `{ T1 T2 -> R }`, the current token being the `{`.
    fn parse_fun_type(&mut self) -> ParseResult<Option<TypeId>> {
        self.advance();
        let mut args = Vec::new();
        while !self.check(&TokenKind::Arrow) {
            match self.parse_type()? {
                Some(t) => args.push(t),
                None => return Ok(None),
            }
        }
        self.advance();
        let Some(ret) = self.parse_type()? else {
            return Ok(None);
        };
        if !self.match_token(&TokenKind::RBrace) {
            return Ok(None);
        }
        Ok(Some(self.code.types.fun_sig(ret, &args, false)))
    }
}

#[cfg(test)]
mod tests {
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
    fn test_narrow_int_wraps_on_assignment() {
        assert_eq!(printed("u8 b = 256 + 1; return b;"), "return 1;");
        assert_eq!(printed("i8 b = 128; return b;"), "return -128;");
    }

    #[test]
    fn test_int_widens_to_float() {
        assert_eq!(printed("flt f = 2; return f;"), "return 2.0;");
    }

    #[test]
    fn test_float_into_int_is_rejected() {
        assert_eq!(
            parse_err("int i = 3.5;"),
            "Type 3.5 is not of declared type int"
        );
    }

    #[test]
    fn test_unknown_type_outside_struct() {
        assert_eq!(parse_err("Foo f = null;"), "Undefined name 'Foo'");
    }
}
