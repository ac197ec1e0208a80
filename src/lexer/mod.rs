use lazy_static::lazy_static;
use regex::Regex;

use crate::isa::{Opcode, Register};
use crate::lexer::cursor::Cursor;
use crate::symbol::Span;

pub mod cursor;

lazy_static! {
    static ref DATA: Regex = Regex::new(r"^0x[0-9a-fA-F]+$").unwrap();
    static ref LABEL: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// Single whitespace-separated word of a source line, classified.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Raw text as written in the source
    pub text: &'a str,
    pub span: Span,
}

impl Token<'_> {
    /// Label name for declarations (without the `:`) and references.
    pub fn label_name(&self) -> &str {
        match self.kind {
            TokenKind::LabelDecl => &self.text[..self.text.len() - 1],
            _ => self.text,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Opcode(Opcode),
    Reg(Register),
    /// Hex literal packed big-endian into bytes
    Data(Vec<u8>),
    /// `name:`
    LabelDecl,
    LabelRef,
    Unknown,
}

/// Test if a character separates tokens.
pub(crate) fn is_whitespace(c: char) -> bool {
    c.is_whitespace()
}

/// Decode a `0x` literal. Odd digit counts get a leading zero nibble.
pub(crate) fn parse_data(word: &str) -> Option<Vec<u8>> {
    if !DATA.is_match(word) {
        return None;
    }
    let digits = &word[2..];
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_owned()
    };
    padded
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

pub(crate) fn is_label(word: &str) -> bool {
    LABEL.is_match(word)
}

fn classify(word: &str) -> TokenKind {
    if let Some(op) = Opcode::from_mnemonic(word) {
        TokenKind::Opcode(op)
    } else if let Ok(reg) = word.parse::<Register>() {
        TokenKind::Reg(reg)
    } else if let Some(bytes) = parse_data(word) {
        TokenKind::Data(bytes)
    } else if word.strip_suffix(':').is_some_and(is_label) {
        TokenKind::LabelDecl
    } else if is_label(word) {
        TokenKind::LabelRef
    } else {
        TokenKind::Unknown
    }
}

impl<'a> Cursor<'a> {
    /// Next word of the line, or `None` at the end of the line or the start of a comment.
    pub fn advance_word(&mut self) -> Option<&'a str> {
        self.take_while(is_whitespace);
        if self.is_eof() || self.first() == ';' {
            return None;
        }
        self.reset_pos();
        self.take_while(|c| !is_whitespace(c) && c != ';');
        Some(self.token_str())
    }
}

/// Split one source line into tokens. `line_offs` is the byte offset of the line within the
/// whole source, used for spans.
pub fn tokenize_line(line: &str, line_offs: usize) -> Vec<Token<'_>> {
    let mut cursor = Cursor::new(line);
    std::iter::from_fn(|| {
        let word = cursor.advance_word()?;
        Some(Token {
            kind: classify(word),
            text: word,
            span: Span::new(line_offs + cursor.token_start(), word.len()),
        })
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<TokenKind> {
        tokenize_line(line, 0).into_iter().map(|tok| tok.kind).collect()
    }

    #[test]
    fn classifies_words() {
        assert_eq!(
            kinds("MOVI A 0x1f"),
            vec![
                TokenKind::Opcode(Opcode::MovI),
                TokenKind::Reg(Register::R2),
                TokenKind::Data(vec![0x1f]),
            ]
        );
        assert_eq!(kinds("loop:"), vec![TokenKind::LabelDecl]);
        assert_eq!(kinds("loop"), vec![TokenKind::LabelRef]);
        assert_eq!(kinds("1abc"), vec![TokenKind::Unknown]);
        assert_eq!(kinds("0x"), vec![TokenKind::Unknown]);
        assert_eq!(kinds("0xZZ"), vec![TokenKind::Unknown]);
    }

    #[test]
    fn odd_length_data_padded() {
        assert_eq!(parse_data("0x1"), Some(vec![0x01]));
        assert_eq!(parse_data("0x123"), Some(vec![0x01, 0x23]));
        assert_eq!(parse_data("0xABCDEF"), Some(vec![0xAB, 0xCD, 0xEF]));
        assert_eq!(parse_data("0x0000"), Some(vec![0x00, 0x00]));
        assert_eq!(parse_data("12"), None);
    }

    #[test]
    fn strips_comments() {
        assert_eq!(kinds("; only a comment"), vec![]);
        assert_eq!(
            kinds("  NOP;trailing"),
            vec![TokenKind::Opcode(Opcode::Nop)]
        );
        assert_eq!(kinds("   \t  "), vec![]);
    }

    #[test]
    fn spans_point_into_source() {
        let src = "  ADD\tA  B ; sum";
        let toks = tokenize_line(src, 100);
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[0].span, Span::new(102, 3));
        assert_eq!(toks[1].span, Span::new(106, 1));
        assert_eq!(toks[2].span, Span::new(109, 1));
        assert_eq!(toks[2].text, "B");
    }

    #[test]
    fn label_decl_name() {
        let toks = tokenize_line("start:", 0);
        assert_eq!(toks[0].label_name(), "start");
        // Registers win over label references
        assert_eq!(kinds("SP"), vec![TokenKind::Reg(Register::R0)]);
    }
}
