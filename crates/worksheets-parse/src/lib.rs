pub mod parser;
pub mod tokenizer;

pub use parser::{
    ComputedByDecl, Expr, ExprKind, FieldDecl, ParserError, TypeDecl, TypeExpr, parse,
};
pub use tokenizer::{Token, TokenKind, Tokenizer, TokenizerError};
