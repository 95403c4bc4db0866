//! Recursive-descent parser for worksheet definitions.
//!
//! The output is purely syntactic: `TypeDecl` / `FieldDecl` / `Expr` trees
//! with names left unresolved. Cross-type resolution, dependency analysis,
//! and plugin binding happen in the engine when the catalog is built.

use std::error::Error;
use std::fmt::{self, Display};

use worksheets_common::{Number, RoundingMode, Value};

use crate::tokenizer::{KEYWORDS, Token, TokenKind, Tokenizer, TokenizerError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A custom error type for the parser.
#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl ParserError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        ParserError {
            message: message.into(),
            position: Some(position),
        }
    }
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at offset {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(e: TokenizerError) -> Self {
        ParserError {
            message: e.message,
            position: Some(e.pos),
        }
    }
}

/* ───────────────────────────── AST ───────────────────────────── */

/// Syntactic type reference.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Text,
    Bool,
    Undefined,
    Date,
    Time,
    Number { scale: u8 },
    Slice(Box<TypeExpr>),
    /// A worksheet type, resolved by name after the whole file is parsed.
    Named(String),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    /// A bare field name.
    Ident(String),
    /// A dotted path `a.b.c`.
    Selector(Vec<String>),
    UnaryOp {
        op: String,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `expr round up|down|half` — supplies the rounding mode consumed by
    /// the nearest division beneath it.
    Round {
        mode: RoundingMode,
        expr: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: usize,
}

impl Expr {
    fn new(kind: ExprKind, pos: usize) -> Self {
        Expr { kind, pos }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedByDecl {
    Expr(Expr),
    External,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub index: i32,
    pub name: String,
    pub ty: TypeExpr,
    pub computed_by: Option<ComputedByDecl>,
    pub constrained_by: Vec<Expr>,
    pub pos: usize,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub pos: usize,
}

/// Parse a whole definition source file.
pub fn parse(source: &str) -> Result<Vec<TypeDecl>, ParserError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    Parser {
        tokens,
        pos: 0,
        end: source.len(),
    }
    .parse_file()
}

/* ─────────────────────────── Parser ──────────────────────────── */

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

fn binary_precedence(token: &Token) -> Option<u8> {
    if token.is_ident("in") {
        return Some(3);
    }
    if token.kind != TokenKind::Op {
        return None;
    }
    match token.text.as_str() {
        "||" => Some(1),
        "&&" => Some(2),
        "==" | "!=" | "<" | "<=" | ">" | ">=" => Some(3),
        "+" | "-" => Some(4),
        "*" | "/" => Some(5),
        _ => None,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn here(&self) -> usize {
        self.peek().map(|t| t.pos).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn err_here(&self, message: impl Into<String>) -> ParserError {
        ParserError::new(message, self.here())
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParserError> {
        match self.next() {
            Some(t) if t.kind == kind => Ok(t),
            Some(t) => Err(ParserError::new(
                format!("expected {what}, found '{}'", t.text),
                t.pos,
            )),
            None => Err(ParserError::new(
                format!("expected {what}, found end of input"),
                self.end,
            )),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<Token, ParserError> {
        match self.next() {
            Some(t) if t.is_ident(word) => Ok(t),
            Some(t) => Err(ParserError::new(
                format!("expected '{word}', found '{}'", t.text),
                t.pos,
            )),
            None => Err(ParserError::new(
                format!("expected '{word}', found end of input"),
                self.end,
            )),
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_ident(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// An identifier usable as a name (not a reserved word).
    fn expect_name(&mut self, what: &str) -> Result<Token, ParserError> {
        let token = self.expect_kind(TokenKind::Ident, what)?;
        if KEYWORDS.contains(token.text.as_str()) {
            return Err(ParserError::new(
                format!("'{}' is a reserved word", token.text),
                token.pos,
            ));
        }
        Ok(token)
    }

    /* ──────────────────────── file level ─────────────────────── */

    fn parse_file(mut self) -> Result<Vec<TypeDecl>, ParserError> {
        let mut decls: Vec<TypeDecl> = Vec::new();
        while self.peek().is_some() {
            let decl = self.parse_typedef()?;
            if decls.iter().any(|d| d.name == decl.name) {
                return Err(ParserError::new(
                    format!("duplicate worksheet type '{}'", decl.name),
                    decl.pos,
                ));
            }
            decls.push(decl);
        }
        Ok(decls)
    }

    fn parse_typedef(&mut self) -> Result<TypeDecl, ParserError> {
        let start = self.expect_keyword("type")?;
        let name = self.expect_name("worksheet type name")?;
        self.expect_keyword("worksheet")?;
        self.expect_kind(TokenKind::LBrace, "'{'")?;

        let mut fields: Vec<FieldDecl> = Vec::new();
        loop {
            if self.peek().is_none() {
                return Err(self.err_here("expected field or '}', found end of input"));
            }
            if self.peek().is_some_and(|t| t.kind == TokenKind::RBrace) {
                self.pos += 1;
                break;
            }
            let field = self.parse_field()?;
            if fields.iter().any(|f| f.name == field.name) {
                return Err(ParserError::new(
                    format!("{}: duplicate field name '{}'", name.text, field.name),
                    field.pos,
                ));
            }
            if fields.iter().any(|f| f.index == field.index) {
                return Err(ParserError::new(
                    format!("{}: duplicate field index {}", name.text, field.index),
                    field.pos,
                ));
            }
            fields.push(field);
        }

        Ok(TypeDecl {
            name: name.text,
            fields,
            pos: start.pos,
        })
    }

    fn parse_field(&mut self) -> Result<FieldDecl, ParserError> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Op && t.text == "-") {
            return Err(self.err_here(
                "field indices must be positive (-1 and -2 are reserved for version and id)",
            ));
        }
        let index_token = self.expect_kind(TokenKind::Int, "field index")?;
        let index: i32 = index_token
            .text
            .parse()
            .map_err(|_| ParserError::new("field index out of range", index_token.pos))?;
        if index == 0 {
            return Err(ParserError::new(
                "field indices must be positive",
                index_token.pos,
            ));
        }
        self.expect_kind(TokenKind::Colon, "':'")?;
        let name = self.expect_name("field name")?;
        let ty = self.parse_type()?;

        let mut computed_by = None;
        let mut constrained_by = Vec::new();
        loop {
            if self.eat_ident("computed_by") {
                if computed_by.is_some() {
                    return Err(self.err_here(format!("{}: multiple computed_by blocks", name.text)));
                }
                computed_by = Some(self.parse_computed_by()?);
            } else if self.eat_ident("constrained_by") {
                if !constrained_by.is_empty() {
                    return Err(
                        self.err_here(format!("{}: multiple constrained_by blocks", name.text))
                    );
                }
                constrained_by = self.parse_constrained_by()?;
            } else {
                break;
            }
        }

        Ok(FieldDecl {
            index,
            name: name.text,
            ty,
            computed_by,
            constrained_by,
            pos: index_token.pos,
        })
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ParserError> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::LBracket) {
            self.pos += 1;
            self.expect_kind(TokenKind::RBracket, "']'")?;
            return Ok(TypeExpr::Slice(Box::new(self.parse_type()?)));
        }
        let token = self.expect_kind(TokenKind::Ident, "type")?;
        match token.text.as_str() {
            "text" => Ok(TypeExpr::Text),
            "bool" => Ok(TypeExpr::Bool),
            "undefined" => Ok(TypeExpr::Undefined),
            "date" => Ok(TypeExpr::Date),
            "time" => Ok(TypeExpr::Time),
            "number" => {
                self.expect_kind(TokenKind::LBracket, "'['")?;
                let scale_token = self.expect_kind(TokenKind::Int, "number scale")?;
                let scale: u8 = scale_token.text.parse().map_err(|_| {
                    ParserError::new("number scale out of range", scale_token.pos)
                })?;
                self.expect_kind(TokenKind::RBracket, "']'")?;
                Ok(TypeExpr::Number { scale })
            }
            other if KEYWORDS.contains(other) => Err(ParserError::new(
                format!("unknown type '{other}'"),
                token.pos,
            )),
            _ => Ok(TypeExpr::Named(token.text)),
        }
    }

    fn parse_computed_by(&mut self) -> Result<ComputedByDecl, ParserError> {
        self.expect_kind(TokenKind::LBrace, "'{'")?;
        if self.eat_ident("external") {
            self.expect_kind(TokenKind::RBrace, "'}'")?;
            return Ok(ComputedByDecl::External);
        }
        // `return` is conventional but optional
        self.eat_ident("return");
        let expr = self.parse_expression()?;
        self.expect_kind(TokenKind::RBrace, "'}'")?;
        Ok(ComputedByDecl::Expr(expr))
    }

    fn parse_constrained_by(&mut self) -> Result<Vec<Expr>, ParserError> {
        self.expect_kind(TokenKind::LBrace, "'{'")?;
        let mut exprs = Vec::new();
        loop {
            if self.peek().is_some_and(|t| t.kind == TokenKind::RBrace) {
                self.pos += 1;
                break;
            }
            self.eat_ident("return");
            exprs.push(self.parse_expression()?);
        }
        if exprs.is_empty() {
            return Err(self.err_here("constrained_by requires at least one expression"));
        }
        Ok(exprs)
    }

    /* ──────────────────────── expressions ────────────────────── */

    fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_binary(1)?;
        while self.peek().is_some_and(|t| t.is_ident("round")) {
            let round = self.next().unwrap();
            let mode = self.parse_rounding_mode()?;
            expr = Expr::new(
                ExprKind::Round {
                    mode,
                    expr: Box::new(expr),
                },
                round.pos,
            );
        }
        Ok(expr)
    }

    fn parse_rounding_mode(&mut self) -> Result<RoundingMode, ParserError> {
        match self.next() {
            Some(t) if t.is_ident("up") => Ok(RoundingMode::Up),
            Some(t) if t.is_ident("down") => Ok(RoundingMode::Down),
            Some(t) if t.is_ident("half") => Ok(RoundingMode::HalfEven),
            Some(t) => Err(ParserError::new(
                format!("expected rounding mode (up, down, half), found '{}'", t.text),
                t.pos,
            )),
            None => Err(ParserError::new(
                "expected rounding mode (up, down, half), found end of input",
                self.end,
            )),
        }
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParserError> {
        let mut left = self.parse_unary()?;
        loop {
            let Some(precedence) = self.peek().and_then(binary_precedence) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            let op = self.next().unwrap();
            let right = self.parse_binary(precedence + 1)?;
            left = Expr::new(
                ExprKind::BinaryOp {
                    op: op.text,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                op.pos,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Op && (token.text == "!" || token.text == "-") {
                let op = self.next().unwrap();
                let operand = self.parse_unary()?;
                return Ok(Expr::new(
                    ExprKind::UnaryOp {
                        op: op.text,
                        expr: Box::new(operand),
                    },
                    op.pos,
                ));
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let Some(token) = self.next() else {
            return Err(ParserError::new(
                "expected expression, found end of input",
                self.end,
            ));
        };
        match token.kind {
            TokenKind::Int | TokenKind::Decimal => {
                let number = Number::parse(&token.text)
                    .map_err(|e| ParserError::new(String::from(e), token.pos))?;
                Ok(Expr::new(ExprKind::Literal(Value::Number(number)), token.pos))
            }
            TokenKind::Text => Ok(Expr::new(
                ExprKind::Literal(Value::Text(token.text)),
                token.pos,
            )),
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect_kind(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Ident => match token.text.as_str() {
                "true" => Ok(Expr::new(ExprKind::Literal(Value::Bool(true)), token.pos)),
                "false" => Ok(Expr::new(ExprKind::Literal(Value::Bool(false)), token.pos)),
                "undefined" => Ok(Expr::new(ExprKind::Literal(Value::Undefined), token.pos)),
                name if KEYWORDS.contains(name) => Err(ParserError::new(
                    format!("unexpected '{name}' in expression"),
                    token.pos,
                )),
                _ => self.parse_selector_or_call(token),
            },
            _ => Err(ParserError::new(
                format!("unexpected '{}' in expression", token.text),
                token.pos,
            )),
        }
    }

    fn parse_selector_or_call(&mut self, first: Token) -> Result<Expr, ParserError> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
            self.pos += 1;
            let mut args = Vec::new();
            if !self.peek().is_some_and(|t| t.kind == TokenKind::RParen) {
                loop {
                    args.push(self.parse_expression()?);
                    if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            self.expect_kind(TokenKind::RParen, "')'")?;
            return Ok(Expr::new(
                ExprKind::Call {
                    name: first.text,
                    args,
                },
                first.pos,
            ));
        }

        let mut path = vec![first.text];
        while self.peek().is_some_and(|t| t.kind == TokenKind::Dot) {
            self.pos += 1;
            let segment = self.expect_name("field name after '.'")?;
            path.push(segment.text);
        }
        if path.len() == 1 {
            Ok(Expr::new(ExprKind::Ident(path.pop().unwrap()), first.pos))
        } else {
            Ok(Expr::new(ExprKind::Selector(path), first.pos))
        }
    }
}
