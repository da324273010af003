//! Lexer for Sonic source.
//!
//! Produces tokens on demand; the parser pulls one token at a time and
//! clones the lexer when it needs to backtrack.

pub mod cursor;
pub mod number;

use crate::token::{Keyword, Token, TokenKind};
use cursor::Cursor;

#[inline]
#[must_use]
pub fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
#[must_use]
pub fn is_id_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// On-demand tokenizer.
#[derive(Debug, Clone)]
pub struct Lexer<'src> {
    cursor: Cursor<'src>,
}

impl<'src> Lexer<'src> {
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// Lex the next token; returns `Eof` forever once input runs out.
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let line = self.cursor.line();
        let Some(c) = self.cursor.bump() else {
            return Token::new(TokenKind::Eof, line);
        };
        let kind = match c {
            c if c.is_ascii_digit() => number::parse_number(&mut self.cursor, c),
            c if is_id_start(c) => self.identifier(c),
            '+' => TokenKind::Plus,
            '-' => {
                if self.cursor.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '!' => {
                if self.cursor.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.cursor.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.cursor.eat('<') {
                    TokenKind::Shl
                } else if self.cursor.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.cursor.eat('>') {
                    if self.cursor.eat('>') {
                        TokenKind::Shr
                    } else {
                        TokenKind::Sar
                    }
                } else if self.cursor.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            other => TokenKind::Error(other.to_string()),
        };
        Token::new(kind, line)
    }

    /// Whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            self.cursor.eat_while(char::is_whitespace);
            if self.cursor.first() == '/' && self.cursor.second() == '/' {
                self.cursor.eat_while(|c| c != '\n');
            } else {
                return;
            }
        }
    }

    fn identifier(&mut self, first: char) -> TokenKind {
        let start = self.cursor.pos() - first.len_utf8();
        self.cursor.eat_while(is_id_continue);
        let text = self.cursor.slice_from(start);
        match Keyword::from_str(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text.to_string()),
        }
    }
}

/// Lex a whole source string, ending with `Eof`.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    loop {
        let tok = lexer.next_token();
        let eof = tok.is_eof();
        out.push(tok);
        if eof {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_statement() {
        assert_eq!(
            kinds("int a = 1;"),
            vec![
                TokenKind::Ident("int".into()),
                TokenKind::Ident("a".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_multi_char_operators() {
        assert_eq!(
            kinds("<< >> >>> <= >= == != -> !"),
            vec![
                TokenKind::Shl,
                TokenKind::Sar,
                TokenKind::Shr,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Arrow,
                TokenKind::Bang,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let toks = tokenize("// header\nreturn // trailing\n  arg;");
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::Return));
        assert_eq!(toks[0].line, 2);
        assert_eq!(toks[1].kind, TokenKind::Ident("arg".into()));
        assert_eq!(toks[1].line, 3);
    }

    #[test]
    fn test_field_access_after_number_and_name() {
        assert_eq!(
            kinds("p.f?"),
            vec![
                TokenKind::Ident("p".into()),
                TokenKind::Dot,
                TokenKind::Ident("f".into()),
                TokenKind::Question,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unknown_character() {
        assert_eq!(kinds("@")[0], TokenKind::Error("@".into()));
    }
}
