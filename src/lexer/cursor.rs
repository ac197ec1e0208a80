// Heavily inspired and referenced from `rustc_lexer` and adapted to suit the project.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

/// Peekable iterator over a char sequence.
pub struct Cursor<'a> {
    input: &'a str,
    chars: Chars<'a>,
    /// Byte offset where the current token started
    token_start: usize,
}

pub(crate) const EOF_CHAR: char = '\0';

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Cursor<'a> {
        Cursor {
            input,
            chars: input.chars(),
            token_start: 0,
        }
    }

    /// Byte offset of the cursor within the input
    pub fn pos(&self) -> usize {
        self.input.len() - self.chars.as_str().len()
    }

    /// Peek the next char without consuming it. Returns [`EOF_CHAR`] at the end.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    /// Input is fully consumed
    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Advance by one character
    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Eat characters while the predicate holds or until the end of input
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }

    /// Start a new token at the current position
    pub fn reset_pos(&mut self) {
        self.token_start = self.pos();
    }

    /// Slice of the input covered by the current token
    pub fn token_str(&self) -> &'a str {
        &self.input[self.token_start..self.pos()]
    }

    pub fn token_start(&self) -> usize {
        self.token_start
    }
}
