//! Low-level character cursor for lexer navigation.

/// End-of-file sentinel character.
pub const EOF_CHAR: char = '\0';

/// A cursor over source code that tracks position and line.
#[derive(Debug, Clone)]
pub struct Cursor<'src> {
    source: &'src str,
    chars: std::str::Chars<'src>,
    /// Current byte position in source.
    pos: usize,
    /// Current 1-based line.
    line: u32,
}

impl<'src> Cursor<'src> {
    #[inline]
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            chars: source.chars(),
            pos: 0,
            line: 1,
        }
    }

    #[inline]
    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    #[inline]
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// Peek at the next character without consuming it.
    #[inline]
    #[must_use]
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    /// Peek at the character after next without consuming.
    #[inline]
    #[must_use]
    pub fn second(&self) -> char {
        let mut chars = self.chars.clone();
        chars.next();
        chars.next().unwrap_or(EOF_CHAR)
    }

    /// Consume and return the next character.
    #[inline]
    pub fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Consume characters while the predicate returns true.
    #[inline]
    pub fn eat_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while !self.is_eof() && predicate(self.first()) {
            self.bump();
        }
    }

    /// Consume a specific character if it matches.
    #[inline]
    pub fn eat(&mut self, c: char) -> bool {
        if self.first() == c {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Slice of the source from `start` to the current position.
    #[inline]
    #[must_use]
    pub fn slice_from(&self, start: usize) -> &'src str {
        &self.source[start..self.pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_lookahead() {
        let cursor = Cursor::new("abc");
        assert_eq!(cursor.first(), 'a');
        assert_eq!(cursor.second(), 'b');
        assert!(!cursor.is_eof());
    }

    #[test]
    fn test_cursor_tracks_lines() {
        let mut cursor = Cursor::new("a\nb");
        cursor.bump();
        assert_eq!(cursor.line(), 1);
        cursor.bump();
        assert_eq!(cursor.line(), 2);
        assert_eq!(cursor.bump(), Some('b'));
        assert_eq!(cursor.bump(), None);
        assert_eq!(cursor.first(), EOF_CHAR);
    }

    #[test]
    fn test_cursor_eat_and_slice() {
        let mut cursor = Cursor::new("  x1 = 2");
        cursor.eat_while(|c| c == ' ');
        let start = cursor.pos();
        cursor.eat_while(|c| c.is_ascii_alphanumeric());
        assert_eq!(cursor.slice_from(start), "x1");
        assert!(!cursor.eat('='));
        assert!(cursor.eat(' '));
        assert!(cursor.eat('='));
    }
}
