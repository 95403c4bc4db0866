//! Tokenizer for the worksheet definition language.
//!
//! Produces a flat token stream with byte offsets; `//` comments and
//! whitespace are skipped. Keywords stay `Ident` tokens — the parser decides
//! what is a keyword in context, so field names like `text_color` or types
//! used as identifiers never fight the lexer.

use std::error::Error;
use std::fmt::{self, Display};

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Identifiers the parser treats as reserved in at least one position.
pub static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "type",
        "worksheet",
        "text",
        "bool",
        "number",
        "undefined",
        "date",
        "time",
        "computed_by",
        "constrained_by",
        "external",
        "return",
        "round",
        "up",
        "down",
        "half",
        "true",
        "false",
        "in",
    ]
    .into_iter()
    .collect()
});

/// A custom error type for the tokenizer.
#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError at offset {}: {}", self.pos, self.message)
    }
}

impl Error for TokenizerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Int,
    Decimal,
    Text,
    Op,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, pos: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            pos,
        }
    }

    pub fn is_ident(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:?}>", self.kind, self.text)
    }
}

pub struct Tokenizer<'a> {
    source: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Tokenizer {
            source: source.as_bytes(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizerError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn err(&self, pos: usize, message: impl Into<String>) -> TokenizerError {
        TokenizerError {
            message: message.into(),
            pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizerError> {
        self.skip_trivia();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            b'{' => self.single(TokenKind::LBrace, start),
            b'}' => self.single(TokenKind::RBrace, start),
            b'[' => self.single(TokenKind::LBracket, start),
            b']' => self.single(TokenKind::RBracket, start),
            b'(' => self.single(TokenKind::LParen, start),
            b')' => self.single(TokenKind::RParen, start),
            b':' => self.single(TokenKind::Colon, start),
            b',' => self.single(TokenKind::Comma, start),
            b'.' => self.single(TokenKind::Dot, start),
            b'+' | b'-' | b'*' | b'/' => self.single(TokenKind::Op, start),
            b'&' | b'|' => {
                // only '&&' and '||' exist
                if self.peek_at(1) != Some(c) {
                    return Err(self.err(start, format!("unexpected character '{}'", c as char)));
                }
                self.pos += 2;
                self.slice_token(TokenKind::Op, start)
            }
            b'=' => {
                if self.peek_at(1) != Some(b'=') {
                    return Err(self.err(start, "unexpected character '='"));
                }
                self.pos += 2;
                self.slice_token(TokenKind::Op, start)
            }
            b'!' | b'<' | b'>' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                }
                self.slice_token(TokenKind::Op, start)
            }
            b'"' => return self.string_token(start).map(Some),
            b'0'..=b'9' => return self.number_token(start).map(Some),
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while let Some(c) = self.peek() {
                    if c == b'_' || c.is_ascii_alphanumeric() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.slice_token(TokenKind::Ident, start)
            }
            other => {
                return Err(self.err(start, format!("unexpected character '{}'", other as char)));
            }
        };
        Ok(Some(token))
    }

    fn single(&mut self, kind: TokenKind, start: usize) -> Token {
        self.pos += 1;
        self.slice_token(kind, start)
    }

    fn slice_token(&self, kind: TokenKind, start: usize) -> Token {
        let text = std::str::from_utf8(&self.source[start..self.pos])
            .expect("token boundaries fall on ascii");
        Token::new(kind, text, start)
    }

    fn number_token(&mut self, start: usize) -> Result<Token, TokenizerError> {
        let mut decimal = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !decimal && matches!(self.peek_at(1), Some(b'0'..=b'9')) => {
                    decimal = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let kind = if decimal {
            TokenKind::Decimal
        } else {
            TokenKind::Int
        };
        Ok(self.slice_token(kind, start))
    }

    fn string_token(&mut self, start: usize) -> Result<Token, TokenizerError> {
        self.pos += 1; // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err(start, "unterminated string literal")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Text, text, start));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => text.push('"'),
                        Some(b'\\') => text.push('\\'),
                        Some(b'n') => text.push('\n'),
                        _ => return Err(self.err(self.pos, "unknown escape sequence")),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // consume one utf-8 scalar
                    let rest = std::str::from_utf8(&self.source[self.pos..])
                        .map_err(|_| self.err(self.pos, "invalid utf-8 in string literal"))?;
                    let ch = rest.chars().next().unwrap();
                    text.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }
}
