//! Token definitions for the Sonic lexer.

use std::fmt;

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token.
    pub kind: TokenKind,
    /// 1-based source line the token starts on.
    pub line: u32,
}

impl Token {
    #[inline]
    #[must_use]
    pub const fn new(kind: TokenKind, line: u32) -> Self {
        Self { kind, line }
    }

    #[inline]
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

/// Token kinds.
///
/// Type names (`int`, `flt`, `u8`, ...) are plain identifiers; the parser
/// resolves them against its type table.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    /// Integer literal.
    Int(i64),
    /// Float literal; always written with a `.` or an exponent.
    Float(f64),
    /// Identifier or type name.
    Ident(String),
    /// Reserved word.
    Keyword(Keyword),

    // Operators
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `<<`
    Shl,
    /// `>>`
    Sar,
    /// `>>>`
    Shr,
    /// `!`
    Bang,
    /// `=`
    Assign,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `->`
    Arrow,

    // Delimiters
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `;`
    Semi,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `?`
    Question,

    /// A character that starts no token, or a malformed literal.
    Error(String),
    /// End of input.
    Eof,
}

impl TokenKind {
    /// Whether `self` and `other` are the same kind, ignoring payloads.
    #[inline]
    #[must_use]
    pub fn same_kind(&self, other: &TokenKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n:?}"),
            Self::Ident(s) => f.write_str(s),
            Self::Keyword(kw) => write!(f, "{kw}"),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Amp => f.write_str("&"),
            Self::Pipe => f.write_str("|"),
            Self::Caret => f.write_str("^"),
            Self::Shl => f.write_str("<<"),
            Self::Sar => f.write_str(">>"),
            Self::Shr => f.write_str(">>>"),
            Self::Bang => f.write_str("!"),
            Self::Assign => f.write_str("="),
            Self::EqEq => f.write_str("=="),
            Self::NotEq => f.write_str("!="),
            Self::Lt => f.write_str("<"),
            Self::Le => f.write_str("<="),
            Self::Gt => f.write_str(">"),
            Self::Ge => f.write_str(">="),
            Self::Arrow => f.write_str("->"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::LBrace => f.write_str("{"),
            Self::RBrace => f.write_str("}"),
            Self::Semi => f.write_str(";"),
            Self::Comma => f.write_str(","),
            Self::Dot => f.write_str("."),
            Self::Question => f.write_str("?"),
            Self::Error(s) => f.write_str(s),
            Self::Eof => f.write_str("<EOF>"),
        }
    }
}

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `else`
    Else,
    /// `false`
    False,
    /// `for`
    For,
    /// `if`
    If,
    /// `new`
    New,
    /// `null`
    Null,
    /// `return`
    Return,
    /// `struct`
    Struct,
    /// `true`
    True,
    /// `val`
    Val,
    /// `var`
    Var,
    /// `while`
    While,
}

impl Keyword {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "break" => Some(Self::Break),
            "continue" => Some(Self::Continue),
            "else" => Some(Self::Else),
            "false" => Some(Self::False),
            "for" => Some(Self::For),
            "if" => Some(Self::If),
            "new" => Some(Self::New),
            "null" => Some(Self::Null),
            "return" => Some(Self::Return),
            "struct" => Some(Self::Struct),
            "true" => Some(Self::True),
            "val" => Some(Self::Val),
            "var" => Some(Self::Var),
            "while" => Some(Self::While),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Else => "else",
            Self::False => "false",
            Self::For => "for",
            Self::If => "if",
            Self::New => "new",
            Self::Null => "null",
            Self::Return => "return",
            Self::Struct => "struct",
            Self::True => "true",
            Self::Val => "val",
            Self::Var => "var",
            Self::While => "while",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_round_trip() {
        for kw in [
            Keyword::While,
            Keyword::For,
            Keyword::Break,
            Keyword::Continue,
            Keyword::Struct,
            Keyword::Val,
            Keyword::Null,
        ] {
            assert_eq!(Keyword::from_str(kw.as_str()), Some(kw));
        }
        assert_eq!(Keyword::from_str("int"), None);
    }

    #[test]
    fn test_same_kind_ignores_payload() {
        assert!(TokenKind::Int(1).same_kind(&TokenKind::Int(2)));
        assert!(!TokenKind::Int(1).same_kind(&TokenKind::Float(1.0)));
        assert_eq!(TokenKind::Shr.to_string(), ">>>");
    }
}
