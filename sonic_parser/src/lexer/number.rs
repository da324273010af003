//! Number literal lexing.
//!
//! - Decimal integers: `42`
//! - Hex integers: `0x2A`
//! - Floats: `3.14`, `1e10`, `2.5e-3`

use super::cursor::Cursor;
use crate::token::TokenKind;

/// Lex a number whose first digit `first_char` was already consumed.
pub fn parse_number(cursor: &mut Cursor<'_>, first_char: char) -> TokenKind {
    if first_char == '0' && matches!(cursor.first(), 'x' | 'X') {
        cursor.bump();
        let start = cursor.pos();
        cursor.eat_while(|c| c.is_ascii_hexdigit());
        let digits = cursor.slice_from(start);
        return match i64::from_str_radix(digits, 16) {
            Ok(n) => TokenKind::Int(n),
            Err(_) => TokenKind::Error(format!("0x{digits}")),
        };
    }

    let start = cursor.pos() - first_char.len_utf8();
    cursor.eat_while(|c| c.is_ascii_digit());
    let mut is_float = false;
    if cursor.first() == '.' && cursor.second().is_ascii_digit() {
        is_float = true;
        cursor.bump();
        cursor.eat_while(|c| c.is_ascii_digit());
    }
    if matches!(cursor.first(), 'e' | 'E') {
        is_float = true;
        cursor.bump();
        if matches!(cursor.first(), '+' | '-') {
            cursor.bump();
        }
        cursor.eat_while(|c| c.is_ascii_digit());
    }

    let text = cursor.slice_from(start);
    if is_float {
        match text.parse::<f64>() {
            Ok(v) => TokenKind::Float(v),
            Err(_) => TokenKind::Error(text.to_string()),
        }
    } else if text.len() > 1 && text.starts_with('0') {
        // No octal; a leading zero is a typo.
        TokenKind::Error(text.to_string())
    } else {
        match text.parse::<i64>() {
            Ok(n) => TokenKind::Int(n),
            Err(_) => TokenKind::Error(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> TokenKind {
        let mut cursor = Cursor::new(src);
        let first = cursor.bump().unwrap();
        parse_number(&mut cursor, first)
    }

    #[test]
    fn test_integers() {
        assert_eq!(lex("42"), TokenKind::Int(42));
        assert_eq!(lex("0"), TokenKind::Int(0));
        assert_eq!(lex("0x1F"), TokenKind::Int(31));
    }

    #[test]
    fn test_floats() {
        assert_eq!(lex("3.14"), TokenKind::Float(3.14));
        assert_eq!(lex("1e3"), TokenKind::Float(1000.0));
        assert_eq!(lex("2.5e-1"), TokenKind::Float(0.25));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(lex("012"), TokenKind::Error(_)));
        assert!(matches!(lex("99999999999999999999"), TokenKind::Error(_)));
    }

    #[test]
    fn test_dot_after_integer_is_not_a_float() {
        let mut cursor = Cursor::new("1.f");
        let first = cursor.bump().unwrap();
        assert_eq!(parse_number(&mut cursor, first), TokenKind::Int(1));
        assert_eq!(cursor.first(), '.');
    }
}
